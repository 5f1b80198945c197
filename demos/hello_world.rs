use pier_web::{Reply, Router, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let router = Router::new().route("/", |_| async {
        Ok(Reply::from(
            "<h1>Main Page</h1>Emoji: 🌐<br>\r\n\r\n<p>new line test</p>\r\n",
        ))
    });

    // Serves on the default endpoint, 127.0.0.1:1818.
    Server::builder().router(router).build().launch().await;
}
