use thiserror::Error;

#[derive(Debug, Error)]
pub enum RobotsError {
    #[error("transport error fetching robots.txt: {0}")]
    Transport(String),
    #[error("robots.txt origin has no host")]
    NoHost,
}
