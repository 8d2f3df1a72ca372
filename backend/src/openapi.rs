//! OpenAPI documentation configuration.

use crate::api::health::{HealthResponse, ServerInfoResponse, SessionStateCounts};
use sluice_types::{JsonRpcError, JsonRpcRequest, ListResourcesResult, ResourceDescriptor};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::sse::sse_get,
        crate::api::sse::sse_post,
        crate::api::sse::sse_delete,
        crate::api::health::health,
        crate::api::health::server_info,
    ),
    components(
        schemas(
            JsonRpcRequest,
            JsonRpcError,
            ListResourcesResult,
            ResourceDescriptor,
            HealthResponse,
            SessionStateCounts,
            ServerInfoResponse,
        )
    ),
    tags(
        (name = "Sessions", description = "Session-bound JSON-RPC over Server-Sent Events"),
        (name = "System", description = "System information endpoints")
    ),
    info(
        title = "Sluice Resource Server API",
        description = "Session-bound resource streaming over Server-Sent Events",
        license(
            name = "MIT OR Apache-2.0"
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_sse_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/sse"));
        assert!(doc.paths.paths.contains_key("/health"));
        let schemas = &doc.components.as_ref().unwrap().schemas;
        assert!(schemas.contains_key("JsonRpcRequest"));
    }
}
