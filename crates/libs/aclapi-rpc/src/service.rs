use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::RpcError;

pub const REFLECTION_SERVICE: &str = "aclapi.Reflection";
pub const REFLECTION_LIST_METHOD: &str = "aclapi.Reflection/ListServices";

/// A named group of RPC methods. Calls arrive as `"<service>/<method>"`.
#[async_trait]
pub trait RpcService: Send + Sync {
    fn name(&self) -> &'static str;

    fn methods(&self) -> &'static [&'static str];

    async fn call(&self, method: &str, params: Option<JsonValue>) -> Result<JsonValue, RpcError>;
}

/// Decodes call parameters, mapping failures to `InvalidArgument`.
pub fn decode_params<T: DeserializeOwned>(params: Option<JsonValue>) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::invalid_argument("missing params"))?;
    serde_json::from_value(params)
        .map_err(|err| RpcError::invalid_argument(format!("invalid params: {err}")))
}

pub fn encode_result<T: Serialize>(value: &T) -> Result<JsonValue, RpcError> {
    serde_json::to_value(value)
        .map_err(|err| RpcError::internal(format!("failed to encode result: {err}")))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub methods: Vec<String>,
}

/// Maps fully qualified method names to services. Immutable once built.
#[derive(Default)]
pub struct Router {
    services: BTreeMap<&'static str, Arc<dyn RpcService>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub async fn call(
        &self,
        method: &str,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, RpcError> {
        let Some((service_name, method_name)) = method.split_once('/') else {
            return Err(RpcError::unimplemented(method));
        };
        let service =
            self.services.get(service_name).ok_or_else(|| RpcError::unimplemented(method))?;
        if !service.methods().contains(&method_name) {
            return Err(RpcError::unimplemented(method));
        }
        service.call(method_name, params).await
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn reflection_enabled(&self) -> bool {
        self.has_service(REFLECTION_SERVICE)
    }
}

fn describe(service: &dyn RpcService) -> ServiceDescriptor {
    ServiceDescriptor {
        name: service.name().to_string(),
        methods: service.methods().iter().map(|method| method.to_string()).collect(),
    }
}

#[derive(Default)]
pub struct RouterBuilder {
    services: Vec<Arc<dyn RpcService>>,
    reflection: bool,
}

impl RouterBuilder {
    pub fn service(mut self, service: Arc<dyn RpcService>) -> Self {
        self.services.push(service);
        self
    }

    /// Exposes `aclapi.Reflection/ListServices`. Debug aid only.
    pub fn reflection(mut self, enabled: bool) -> Self {
        self.reflection = enabled;
        self
    }

    pub fn build(self) -> Router {
        let mut services: BTreeMap<&'static str, Arc<dyn RpcService>> = BTreeMap::new();
        for service in self.services {
            if services.insert(service.name(), service.clone()).is_some() {
                log::warn!("service {} registered twice; keeping the last one", service.name());
            }
        }
        if self.reflection {
            let mut listing: Vec<ServiceDescriptor> =
                services.values().map(|service| describe(service.as_ref())).collect();
            listing.push(describe(&ReflectionService { listing: Vec::new() }));
            listing.sort_by(|a, b| a.name.cmp(&b.name));
            services.insert(REFLECTION_SERVICE, Arc::new(ReflectionService { listing }));
        }
        Router { services }
    }
}

struct ReflectionService {
    listing: Vec<ServiceDescriptor>,
}

#[async_trait]
impl RpcService for ReflectionService {
    fn name(&self) -> &'static str {
        REFLECTION_SERVICE
    }

    fn methods(&self) -> &'static [&'static str] {
        &["ListServices"]
    }

    async fn call(&self, method: &str, _params: Option<JsonValue>) -> Result<JsonValue, RpcError> {
        match method {
            "ListServices" => encode_result(&serde_json::json!({ "services": self.listing })),
            other => Err(RpcError::unimplemented(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusCode;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RpcService for Echo {
        fn name(&self) -> &'static str {
            "test.Echo"
        }

        fn methods(&self) -> &'static [&'static str] {
            &["Say"]
        }

        async fn call(
            &self,
            _method: &str,
            params: Option<JsonValue>,
        ) -> Result<JsonValue, RpcError> {
            #[derive(Deserialize)]
            struct Say {
                text: String,
            }
            let say: Say = decode_params(params)?;
            Ok(json!({ "text": say.text }))
        }
    }

    fn router(reflection: bool) -> Router {
        Router::builder().service(Arc::new(Echo)).reflection(reflection).build()
    }

    #[tokio::test]
    async fn routes_to_registered_method() {
        let result = router(false)
            .call("test.Echo/Say", Some(json!({ "text": "hi" })))
            .await
            .expect("call");
        assert_eq!(result, json!({ "text": "hi" }));
    }

    #[tokio::test]
    async fn unknown_service_or_method_is_unimplemented() {
        let router = router(false);
        for method in ["test.Echo/Shout", "nope.Svc/Say", "no-slash"] {
            let err = router.call(method, None).await.expect_err("unknown");
            assert_eq!(err.code, StatusCode::Unimplemented, "{method}");
        }
    }

    #[tokio::test]
    async fn bad_params_are_invalid_argument() {
        let router = router(false);
        let err = router.call("test.Echo/Say", None).await.expect_err("missing");
        assert_eq!(err.code, StatusCode::InvalidArgument);
        let err =
            router.call("test.Echo/Say", Some(json!({ "txt": 1 }))).await.expect_err("invalid");
        assert_eq!(err.code, StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn reflection_is_absent_by_default() {
        let router = router(false);
        assert!(!router.reflection_enabled());
        let err = router.call(REFLECTION_LIST_METHOD, None).await.expect_err("disabled");
        assert_eq!(err.code, StatusCode::Unimplemented);
    }

    #[tokio::test]
    async fn reflection_lists_every_service() {
        let router = router(true);
        assert!(router.reflection_enabled());
        let listing = router.call(REFLECTION_LIST_METHOD, None).await.expect("list");
        assert_eq!(
            listing,
            json!({
                "services": [
                    { "name": "aclapi.Reflection", "methods": ["ListServices"] },
                    { "name": "test.Echo", "methods": ["Say"] },
                ]
            })
        );
    }
}
