#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("config ({context}): {detail}")]
    Config {
        context: &'static str,
        detail: String,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("http server: {0}")]
    Serve(#[from] std::io::Error),
}
