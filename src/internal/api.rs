use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::internal::{
    daemon::ManagerHandle,
    device::registry::DeviceError,
    fsm::engine::Engine,
    manager::Manager,
    objects::ObjectRef,
    policy::policy::PolicyError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    CreatePolicy { name: String },
    GetDevice { ifname: String },
    AddSecret {
        security_id: String,
        path: String,
        value: String,
    },
    ListObjects,
    DescribeObject { path: String },
}

impl ControlRequest {
    // Build a request from a method name and its raw arguments, checking
    // arity and argument types.
    pub fn from_method(method: &str, args: &[Value]) -> Result<Self, ControlError> {
        match method {
            "createPolicy" => {
                let [name] = string_args(method, args)?;
                Ok(Self::CreatePolicy { name })
            }
            "getDevice" => {
                let [ifname] = string_args(method, args)?;
                Ok(Self::GetDevice { ifname })
            }
            "addSecret" => {
                let [security_id, path, value] = string_args(method, args)?;
                Ok(Self::AddSecret {
                    security_id,
                    path,
                    value,
                })
            }
            other => Err(ControlError::UnknownMethod(other.to_string())),
        }
    }
}

fn string_args<const N: usize>(method: &str, args: &[Value]) -> Result<[String; N], ControlError> {
    let invalid = || ControlError::InvalidArgs {
        method: method.to_string(),
    };
    if args.len() != N {
        return Err(invalid());
    }
    let strings = args
        .iter()
        .map(|arg| arg.as_str().map(str::to_string).ok_or_else(invalid))
        .collect::<Result<Vec<_>, _>>()?;
    strings.try_into().map_err(|_| invalid())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ControlReply {
    Path { path: String },
    Ack { ok: bool },
    Objects { objects: Vec<String> },
    Object(ObjectDescription),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ObjectDescription {
    pub path: String,
    #[serde(flatten)]
    pub object: ObjectRef,
    pub name: Option<String>,
    pub user_controlled: Option<bool>,
    pub has_security_id: Option<bool>,
    pub active_policy: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Invalid arguments in call to {method}")]
    InvalidArgs { method: String },
    #[error("Unknown method {0}")]
    UnknownMethod(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("No such object: {0}")]
    NoSuchObject(String),
    #[error("Manager is not running")]
    Unavailable,
}

impl ControlError {
    pub fn fault(&self) -> &'static str {
        match self {
            ControlError::InvalidArgs { .. } => "InvalidArgs",
            ControlError::UnknownMethod(_) => "UnknownMethod",
            ControlError::Device(DeviceError::NotKnown(_)) => "DeviceNotKnown",
            ControlError::Device(DeviceError::Exposure(_)) => "Failed",
            ControlError::Policy(PolicyError::Exists(_)) => "PolicyExists",
            ControlError::Policy(PolicyError::InvalidName(_)) => "InvalidArgs",
            ControlError::Policy(PolicyError::Engine(_)) => "Failed",
            ControlError::NoSuchObject(_) => "NoSuchObject",
            ControlError::Unavailable => "Failed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ControlError::InvalidArgs { .. }
            | ControlError::Policy(PolicyError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            ControlError::UnknownMethod(_)
            | ControlError::Device(DeviceError::NotKnown(_))
            | ControlError::NoSuchObject(_) => StatusCode::NOT_FOUND,
            ControlError::Device(DeviceError::Exposure(_)) => StatusCode::CONFLICT,
            ControlError::Policy(PolicyError::Exists(_)) => StatusCode::CONFLICT,
            ControlError::Policy(PolicyError::Engine(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ControlError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub fn dispatch<E: Engine>(
    manager: &mut Manager<E>,
    request: ControlRequest,
) -> Result<ControlReply, ControlError> {
    match request {
        ControlRequest::CreatePolicy { name } => Ok(ControlReply::Path {
            path: manager.create_policy(&name)?,
        }),
        ControlRequest::GetDevice { ifname } => Ok(ControlReply::Path {
            path: manager.device_path_by_name(&ifname)?,
        }),
        ControlRequest::AddSecret {
            security_id,
            path,
            value,
        } => {
            manager.add_secret(&security_id, &path, &value);
            Ok(ControlReply::Ack { ok: true })
        }
        ControlRequest::ListObjects => Ok(ControlReply::Objects {
            objects: manager.objects().paths(),
        }),
        ControlRequest::DescribeObject { path } => describe(manager, &path)
            .map(ControlReply::Object)
            .ok_or(ControlError::NoSuchObject(path)),
    }
}

fn describe<E: Engine>(manager: &Manager<E>, path: &str) -> Option<ObjectDescription> {
    let object = manager.objects().get(path)?;
    let mut description = ObjectDescription {
        path: path.to_string(),
        object,
        name: None,
        user_controlled: None,
        has_security_id: None,
        active_policy: None,
    };

    match object {
        ObjectRef::Manager => {}
        ObjectRef::Interface(worker) | ObjectRef::Modem(worker) => {
            let device = manager.lookup_device(worker)?;
            description.name = Some(device.name.clone());
            description.user_controlled = Some(device.user_controlled);
            description.has_security_id = Some(device.security_id.is_some());
            description.active_policy = device
                .active_policy
                .and_then(|p| manager.lookup_policy(p))
                .map(|p| p.name.clone());
        }
        ObjectRef::Policy(policy) => {
            description.name = manager.lookup_policy(policy).map(|p| p.name.clone());
        }
    }
    Some(description)
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MethodCall {
    #[serde(default)]
    pub args: Vec<Value>,
}

type ApiError = (StatusCode, Json<Value>);

fn fault_response(error: ControlError) -> ApiError {
    (
        error.status(),
        Json(serde_json::json!({"error": error.fault(), "message": error.to_string()})),
    )
}

pub fn create_router(handle: ManagerHandle) -> Router {
    Router::new()
        .route("/v1/manager/:method", post(call_method))
        .route("/v1/objects", get(list_objects))
        .route("/v1/object/*path", get(describe_object))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

async fn call_method(
    State(handle): State<ManagerHandle>,
    Path(method): Path<String>,
    payload: Result<Json<MethodCall>, JsonRejection>,
) -> Result<Json<ControlReply>, ApiError> {
    let request = match payload {
        Ok(Json(call)) => ControlRequest::from_method(&method, &call.args),
        Err(rejection) => {
            tracing::debug!("rejected arguments for {}: {}", method, rejection);
            Err(ControlError::InvalidArgs {
                method: method.clone(),
            })
        }
    }
    .map_err(fault_response)?;

    handle.call(request).await.map(Json).map_err(|e| {
        tracing::debug!("{} failed: {}", method, e);
        fault_response(e)
    })
}

async fn list_objects(State(handle): State<ManagerHandle>) -> Result<Json<ControlReply>, ApiError> {
    handle
        .call(ControlRequest::ListObjects)
        .await
        .map(Json)
        .map_err(fault_response)
}

async fn describe_object(
    State(handle): State<ManagerHandle>,
    Path(path): Path<String>,
) -> Result<Json<ControlReply>, ApiError> {
    let path = format!("/{}", path.trim_start_matches('/'));
    handle
        .call(ControlRequest::DescribeObject { path })
        .await
        .map(Json)
        .map_err(fault_response)
}
