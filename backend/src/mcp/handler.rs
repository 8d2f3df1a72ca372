//! JSON-RPC request dispatcher.
//!
//! Validates one request against the closed method table and executes it
//! against the resource provider. Every failure becomes an error response
//! carrying the caller's id; nothing escapes `dispatch`.

use futures::FutureExt;
use garde::Validate;
use serde::Serialize;
use serde_json::{json, Value};
use sluice_types::rpc::JSONRPC_VERSION;
use sluice_types::{
    error_codes, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListResourcesResult, Method,
    ReadResourceParams, ReadResourceResult, ServerInfo,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::resources::{ResourceError, ResourceProvider};

/// Name announced in the initialize result.
pub const SERVER_NAME: &str = "sluice";

/// Failure of a single request, mapped onto a JSON-RPC error code.
#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("{0}")]
    InvalidParams(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    fn code(&self) -> i32 {
        match self {
            DispatchError::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            DispatchError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            DispatchError::InvalidParams(_) | DispatchError::ResourceNotFound(_) => {
                error_codes::INVALID_PARAMS
            }
            DispatchError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    fn into_response(self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::error(id, self.code(), self.to_string())
    }
}

impl From<ResourceError> for DispatchError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::NotFound(uri) => DispatchError::ResourceNotFound(uri),
            other => DispatchError::Internal(other.to_string()),
        }
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::Internal(e.to_string()))
}

/// Executes requests against a [`ResourceProvider`].
pub struct RpcDispatcher {
    provider: Arc<dyn ResourceProvider>,
    server_info: ServerInfo,
}

impl RpcDispatcher {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            provider,
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Handle one message. Returns `None` only for notifications.
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            self.handle_notification(&request);
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);
        debug!("Dispatching {} (id {})", request.method, id);

        let outcome = AssertUnwindSafe(self.execute(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!("Request handler panicked");
                Err(DispatchError::Internal("request handler panicked".to_string()))
            });

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                debug!("Request {} failed: {}", id, err);
                err.into_response(id)
            }
        })
    }

    async fn execute(&self, request: JsonRpcRequest) -> Result<Value, DispatchError> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(DispatchError::InvalidRequest(format!(
                "Invalid request: jsonrpc must be \"{}\"",
                JSONRPC_VERSION
            )));
        }

        let method = Method::lookup(&request.method)
            .ok_or_else(|| DispatchError::MethodNotFound(request.method.clone()))?;

        match method {
            Method::Initialize => to_result(&InitializeResult::resources_only(
                self.server_info.clone(),
            )),
            Method::Ping => Ok(json!({})),
            Method::ListResources => self.handle_list_resources().await,
            Method::ReadResource => self.handle_read_resource(request.params).await,
            Method::Initialized | Method::Cancelled => Err(DispatchError::InvalidRequest(
                format!("Invalid request: {} is a notification", method),
            )),
        }
    }

    async fn handle_list_resources(&self) -> Result<Value, DispatchError> {
        let resources = self.provider.list().await?;
        to_result(&ListResourcesResult { resources })
    }

    async fn handle_read_resource(&self, params: Option<Value>) -> Result<Value, DispatchError> {
        let params = params.ok_or_else(|| {
            DispatchError::InvalidParams("Invalid params: missing uri".to_string())
        })?;
        let params: ReadResourceParams = serde_json::from_value(params)
            .map_err(|e| DispatchError::InvalidParams(format!("Invalid params: {}", e)))?;
        params
            .validate()
            .map_err(|e| DispatchError::InvalidParams(format!("Invalid params: {}", e)))?;

        let contents = self.provider.read(&params.uri).await?;
        to_result(&ReadResourceResult {
            contents: vec![contents],
        })
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match Method::lookup(&request.method) {
            Some(Method::Initialized) => debug!("Client acknowledged initialization"),
            Some(Method::Cancelled) => debug!("Client cancelled a request: {:?}", request.params),
            Some(method) => warn!("Ignoring {} sent as a notification", method),
            None => debug!("Ignoring unknown notification: {}", request.method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::StaticCatalog;
    use async_trait::async_trait;
    use sluice_types::{ResourceContents, ResourceDescriptor};

    fn dispatcher() -> RpcDispatcher {
        RpcDispatcher::new(Arc::new(StaticCatalog::sample()))
    }

    fn request(id: Value, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(id, method, params)
    }

    fn error_code(response: &JsonRpcResponse) -> i32 {
        response.error.as_ref().map(|e| e.code).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_initialize_echoes_ids_verbatim() {
        let dispatcher = dispatcher();
        for id in [json!("abc"), json!(42), Value::Null] {
            let response = dispatcher
                .dispatch(request(id.clone(), "initialize", None))
                .await
                .unwrap();
            assert_eq!(response.id, id);
            let result = response.result.unwrap();
            assert_eq!(result["protocolVersion"], "2024-11-05");
            assert_eq!(result["serverInfo"]["name"], "sluice");
            assert!(result["capabilities"]["resources"].is_object());
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let response = dispatcher()
            .dispatch(request(json!(1), "ping", None))
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_list_in_provider_order() {
        let response = dispatcher()
            .dispatch(request(json!(2), "resources/list", None))
            .await
            .unwrap();
        let result = response.result.unwrap();
        let uris: Vec<&str> = result["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["uri"].as_str().unwrap())
            .collect();
        assert_eq!(
            uris,
            vec![
                "csv://sample-data",
                "image://test-image",
                "csv://employees",
                "image://logo"
            ]
        );
        assert_eq!(result["resources"][0]["mimeType"], "text/csv");
    }

    #[tokio::test]
    async fn test_read_returns_contents() {
        let response = dispatcher()
            .dispatch(request(
                json!(3),
                "resources/read",
                Some(json!({"uri": "csv://employees"})),
            ))
            .await
            .unwrap();
        let contents = &response.result.unwrap()["contents"][0];
        assert_eq!(contents["uri"], "csv://employees");
        assert_eq!(contents["mimeType"], "text/csv");
        assert!(contents["text"]
            .as_str()
            .unwrap()
            .starts_with("employee_id,first_name,last_name,department"));
    }

    #[tokio::test]
    async fn test_read_unknown_uri_is_invalid_params() {
        let response = dispatcher()
            .dispatch(request(
                json!(4),
                "resources/read",
                Some(json!({"uri": "does-not-exist"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.id, json!(4));
        assert_eq!(error_code(&response), error_codes::INVALID_PARAMS);
        assert!(response
            .error
            .unwrap()
            .message
            .contains("does-not-exist"));
    }

    #[tokio::test]
    async fn test_malformed_read_params() {
        let dispatcher = dispatcher();
        for params in [
            None,
            Some(json!({})),
            Some(json!({"uri": 5})),
            Some(json!({"uri": ""})),
            Some(json!("csv://sample-data")),
        ] {
            let response = dispatcher
                .dispatch(request(json!("p"), "resources/read", params.clone()))
                .await
                .unwrap();
            assert_eq!(
                error_code(&response),
                error_codes::INVALID_PARAMS,
                "params {:?}",
                params
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = dispatcher()
            .dispatch(request(json!(9), "tools/list", None))
            .await
            .unwrap();
        assert_eq!(error_code(&response), error_codes::METHOD_NOT_FOUND);
        assert_eq!(response.id, json!(9));
    }

    #[tokio::test]
    async fn test_wrong_jsonrpc_version() {
        let mut req = request(json!(1), "ping", None);
        req.jsonrpc = "1.0".to_string();
        let response = dispatcher().dispatch(req).await.unwrap();
        assert_eq!(error_code(&response), error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_notifications_produce_no_response() {
        let dispatcher = dispatcher();
        for method in [
            "notifications/initialized",
            "notifications/cancelled",
            "initialize",
            "something/else",
        ] {
            assert!(dispatcher
                .dispatch(JsonRpcRequest::notification(method))
                .await
                .is_none());
        }
    }

    #[tokio::test]
    async fn test_notification_method_with_id_is_rejected() {
        let response = dispatcher()
            .dispatch(request(json!(1), "notifications/initialized", None))
            .await
            .unwrap();
        assert_eq!(error_code(&response), error_codes::INVALID_REQUEST);
    }

    struct BrokenProvider;

    #[async_trait]
    impl ResourceProvider for BrokenProvider {
        async fn list(&self) -> crate::resources::Result<Vec<ResourceDescriptor>> {
            Err(ResourceError::Io(std::io::Error::other("disk gone")))
        }

        async fn read(&self, _uri: &str) -> crate::resources::Result<ResourceContents> {
            panic!("provider bug");
        }
    }

    #[tokio::test]
    async fn test_provider_failures_become_internal_errors() {
        let dispatcher = RpcDispatcher::new(Arc::new(BrokenProvider));

        let response = dispatcher
            .dispatch(request(json!(1), "resources/list", None))
            .await
            .unwrap();
        assert_eq!(error_code(&response), error_codes::INTERNAL_ERROR);

        let response = dispatcher
            .dispatch(request(json!(2), "resources/read", Some(json!({"uri": "x"}))))
            .await
            .unwrap();
        assert_eq!(error_code(&response), error_codes::INTERNAL_ERROR);
        assert_eq!(response.id, json!(2));
    }
}
