use pier_web::{ErrorKind, Reply, Router, Server, StatusCode};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let router = Router::new()
        .route("/", |_| async { Ok(Reply::from("<h1>Main Page</h1>")) })
        .route("/teapot", |_| async {
            Err(ErrorKind::Handler(StatusCode::from_u16(418).expect("teapot")))
        })
        // Status-keyed routes render the body of matching error responses.
        .status(404, |_| async { Reply::from("<h1>Custom not found</h1>") })
        .status(418, |status: StatusCode| async move {
            Reply::from(format!("<h1>{status}</h1>"))
        });

    Server::builder().router(router).build().launch().await;
}
