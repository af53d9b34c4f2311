//! Common imports for building a Lokstra service.

pub use crate::autorouter::{ApiHelper, AutoRouted, HandlerContext, HandlerReturn, MethodDescriptor};
pub use crate::config::{load_deployment, ConfigValue};
pub use crate::convention::{Convention, ConventionRegistry, RestConvention};
pub use crate::deployment::{App, Deployment, Server as DeploymentServer, ServiceDefinition, TlsOptions};
pub use crate::error::AppError;
pub use crate::formatter::{DecodedEnvelope, EnvelopeError, FieldError, Formatter};
pub use crate::listener::{AppListener, NetHttpListener};
pub use crate::proxy::ProxyService;
pub use crate::registry::{downcast, ServiceRegistry, ServiceType};
pub use crate::router::middleware::MiddlewareRegistry;
pub use crate::router::params::{BindableParams, ParamSource, ParamSpec, Validator};
pub use crate::router::{RouteGroup, RouterKernel};
pub use crate::server::{NamedApp, Server};
