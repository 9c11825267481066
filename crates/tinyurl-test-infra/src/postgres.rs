use crate::{Result, TestInfraError};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

#[derive(TypedBuilder)]
pub struct PostgresConfig {
    #[builder(default = "tinyurl".to_string())]
    database: String,
    #[builder(default = "tinyurl".to_string())]
    username: String,
    #[builder(default = "tinyurl".to_string())]
    password: String,
}

impl PostgresConfig {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("database", &self.database),
            ("username", &self.username),
            ("password", &self.password),
        ];
        match fields.into_iter().find(|(_, value)| value.is_empty()) {
            Some((name, _)) => Err(TestInfraError::InvalidConfig {
                service: "postgres",
                reason: format!("{name} must not be empty"),
            }),
            None => Ok(()),
        }
    }
}

/// Test fixture for a disposable PostgreSQL server.
pub struct PostgresServer {
    container: ContainerAsync<GenericImage>,
    config: PostgresConfig,
}

impl PostgresServer {
    /// Starts a PostgreSQL container suitable for integration tests.
    ///
    /// Empty credentials are rejected up front: the image refuses to
    /// initialize without them and the readiness wait would never finish.
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        config.validate()?;

        // The entrypoint restarts the server once after init, so readiness is
        // only trusted once it was reported on both streams.
        let container = GenericImage::new("postgres", "17-alpine")
            .with_exposed_port(5432_u16.tcp())
            .with_wait_for(WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_wait_for(WaitFor::message_on_stdout(
                "database system is ready to accept connections",
            ))
            .with_env_var("POSTGRES_DB", config.database.as_str())
            .with_env_var("POSTGRES_USER", config.username.as_str())
            .with_env_var("POSTGRES_PASSWORD", config.password.as_str())
            .start()
            .await?;

        Ok(Self { container, config })
    }

    pub async fn host(&self) -> Result<String> {
        let host = self.container.get_host().await?.to_string();
        Ok(match host.as_str() {
            "localhost" => String::from("127.0.0.1"),
            _ => host,
        })
    }

    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(5432).await?)
    }

    pub async fn database_url(&self) -> Result<String> {
        let host = self.host().await?;
        let port = self.port().await?;
        Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.config.username, self.config.password, host, port, self.config.database
        ))
    }

    /// Returns the underlying container reference.
    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PostgresConfig::builder().build().validate().is_ok());
    }

    #[tokio::test]
    async fn empty_password_is_rejected_before_starting() {
        let config = PostgresConfig::builder().password(String::new()).build();

        match PostgresServer::new(config).await {
            Err(TestInfraError::InvalidConfig { service, reason }) => {
                assert_eq!(service, "postgres");
                assert_eq!(reason, "password must not be empty");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("container should not start"),
        }
    }
}
