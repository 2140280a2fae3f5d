// The control loop. One task owns the `Manager`; remote calls, hotplug
// notifications and policy changes reach it as events, so manager state is
// never shared and never locked.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::internal::{
    api::{self, ControlError, ControlReply, ControlRequest},
    fsm::engine::Engine,
    manager::{HotplugEvent, Manager},
};

pub struct ControlCall {
    pub request: ControlRequest,
    pub reply: oneshot::Sender<Result<ControlReply, ControlError>>,
}

pub enum ManagerEvent {
    Control(ControlCall),
    Hotplug(HotplugEvent),
    PoliciesChanged,
}

#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerEvent>,
}

impl ManagerHandle {
    pub async fn call(&self, request: ControlRequest) -> Result<ControlReply, ControlError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ManagerEvent::Control(ControlCall { request, reply }))
            .await
            .map_err(|_| ControlError::Unavailable)?;
        response.await.map_err(|_| ControlError::Unavailable)?
    }

    pub async fn hotplug(&self, event: HotplugEvent) -> Result<(), ControlError> {
        self.tx
            .send(ManagerEvent::Hotplug(event))
            .await
            .map_err(|_| ControlError::Unavailable)
    }

    pub async fn policies_changed(&self) -> Result<(), ControlError> {
        self.tx
            .send(ManagerEvent::PoliciesChanged)
            .await
            .map_err(|_| ControlError::Unavailable)
    }
}

pub struct Daemon<E: Engine> {
    manager: Manager<E>,
    events: mpsc::Receiver<ManagerEvent>,
    recheck_interval: Duration,
}

impl<E: Engine> Daemon<E> {
    pub fn new(manager: Manager<E>, recheck_interval: Duration, queue: usize) -> (Self, ManagerHandle) {
        let (tx, events) = mpsc::channel(queue.max(1));
        let daemon = Self {
            manager,
            events,
            recheck_interval,
        };
        (daemon, ManagerHandle { tx })
    }

    pub fn manager(&self) -> &Manager<E> {
        &self.manager
    }

    // Run until `shutdown` resolves or every handle is dropped, then hand
    // the manager back. A pass that has started always completes.
    pub async fn run<F: Future<Output = ()>>(mut self, shutdown: F) -> Manager<E> {
        let mut ticker = tokio::time::interval(self.recheck_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, leaving event loop");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::info!("all manager handles dropped, leaving event loop");
                        break;
                    }
                },
                _ = ticker.tick() => {}
            }

            self.manager.recheck_do();
            self.manager.down_do();
        }
        self.manager
    }

    fn handle_event(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::Control(call) => {
                let result = api::dispatch(&mut self.manager, call.request);
                if call.reply.send(result).is_err() {
                    tracing::debug!("caller went away before the reply was sent");
                }
            }
            ManagerEvent::Hotplug(event) => self.manager.handle_hotplug(event),
            // The epoch check at the start of the next pass picks this up.
            ManagerEvent::PoliciesChanged => tracing::debug!("policy change signalled"),
        }
    }
}
