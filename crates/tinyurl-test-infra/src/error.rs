use thiserror::Error;

/// Failures while provisioning the PostgreSQL and Redis fixtures.
#[derive(Debug, Error)]
pub enum TestInfraError {
    #[error("container error: {0}")]
    Container(#[from] testcontainers::TestcontainersError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The fixture configuration would keep the container from starting.
    #[error("invalid {service} fixture config: {reason}")]
    InvalidConfig {
        service: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, TestInfraError>;
