use pier_web::{Reply, Request, Router, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let router = Router::new()
        // POST a JSON document and get it echoed back:
        //   curl -d '"hi!"' -H 'Content-Type: application/json' 127.0.0.1:1818/echo
        .route("/echo", |req: Request| async move {
            Ok(Reply::Json(req.json()?))
        })
        .route("/user/<id>", |req: Request| async move {
            Ok(Reply::Json(serde_json::json!({ "user": req.param("id") })))
        });

    Server::builder().router(router).build().launch().await;
}
