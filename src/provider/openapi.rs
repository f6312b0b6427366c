#![allow(clippy::needless_for_each)]

#[allow(unused_imports)]
use super::handlers::{
    health::{self, __path_health},
    sso_provider::{__path_sso_provider, __path_sso_provider_complete},
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(health, sso_provider, sso_provider_complete),
    components(
        schemas(health::Health)
    ),
    tags(
        (name = "sso", description = "DiscourseConnect provider"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_provider_routes() {
        let doc = openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|path| *path == "/session/sso_provider"));
        assert!(paths
            .iter()
            .any(|path| *path == "/session/sso_provider/complete"));
        assert!(paths.iter().any(|path| *path == "/health"));
    }
}
