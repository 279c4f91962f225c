//! Custom-resource lifecycle events and responses.
//!
//! Field names follow the provisioning engine's wire format
//! (`RequestType`, `PhysicalResourceId`, ...).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestType::Create => "Create",
            RequestType::Update => "Update",
            RequestType::Delete => "Delete",
        };
        f.write_str(s)
    }
}

/// One lifecycle event delivered to the bootstrap handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleEvent {
    pub request_type: RequestType,
    pub request_id: String,
    pub stack_id: String,
    pub logical_resource_id: String,
    /// Absent on `Create`; the id returned by the previous response otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
}

impl LifecycleEvent {
    pub fn create(stack_id: &str, logical_resource_id: &str, request_id: &str) -> Self {
        Self {
            request_type: RequestType::Create,
            request_id: request_id.to_string(),
            stack_id: stack_id.to_string(),
            logical_resource_id: logical_resource_id.to_string(),
            physical_resource_id: None,
        }
    }

    pub fn update(stack_id: &str, logical_resource_id: &str, request_id: &str, physical_resource_id: &str) -> Self {
        Self {
            request_type: RequestType::Update,
            physical_resource_id: Some(physical_resource_id.to_string()),
            ..Self::create(stack_id, logical_resource_id, request_id)
        }
    }

    pub fn delete(stack_id: &str, logical_resource_id: &str, request_id: &str, physical_resource_id: &str) -> Self {
        Self {
            request_type: RequestType::Delete,
            ..Self::update(stack_id, logical_resource_id, request_id, physical_resource_id)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// What the handler reports back for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    pub status: ResponseStatus,
    pub physical_resource_id: String,
    pub request_id: String,
    pub stack_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LifecycleResponse {
    pub fn success(event: &LifecycleEvent, physical_resource_id: &str) -> Self {
        Self {
            status: ResponseStatus::Success,
            physical_resource_id: physical_resource_id.to_string(),
            request_id: event.request_id.clone(),
            stack_id: event.stack_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            reason: None,
        }
    }

    pub fn failed(event: &LifecycleEvent, physical_resource_id: &str, reason: &str) -> Self {
        Self {
            status: ResponseStatus::Failed,
            reason: Some(reason.to_string()),
            ..Self::success(event, physical_resource_id)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_format() {
        let raw = r#"{
            "RequestType": "Update",
            "RequestId": "b7f2",
            "StackId": "LightsStack",
            "LogicalResourceId": "DataCollectionCustomResourceInitializer0A1B2C3D",
            "PhysicalResourceId": "invocation upon creation"
        }"#;
        let event: LifecycleEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.request_type, RequestType::Update);
        assert_eq!(event.physical_resource_id.as_deref(), Some("invocation upon creation"));
    }

    #[test]
    fn create_has_no_physical_id_on_the_wire() {
        let event = LifecycleEvent::create("LightsStack", "Init", "r-1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["RequestType"], "Create");
        assert!(value.get("PhysicalResourceId").is_none());
    }

    #[test]
    fn failed_response_carries_reason() {
        let event = LifecycleEvent::create("LightsStack", "Init", "r-1");
        let response = LifecycleResponse::failed(&event, "invocation upon creation", "boom");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["Status"], "FAILED");
        assert_eq!(value["Reason"], "boom");
        assert_eq!(value["RequestId"], "r-1");
        assert!(!response.is_success());
    }
}
