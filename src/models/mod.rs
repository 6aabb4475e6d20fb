pub mod config;
pub mod datasource;
pub mod plugin;
pub mod user;

pub use config::{AppConfig, AuthConfig, OAuthProviderConfig};
pub use datasource::{AuthMode, DataSource, DataSourceCommand, DataSourceDto};
pub use plugin::{DataSourcePlugin, JwtTokenAuth, PluginRoute, RouteHeader, TokenAuth};
pub use user::{OrgRole, SignedInUser, UserAuth};
