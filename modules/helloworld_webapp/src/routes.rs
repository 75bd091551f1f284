use axum::{routing::get, Router};

pub const HELLO_WORLD: &str = "Hello World";
pub const ANOTHER: &str = "Another";
pub const ADDITIONAL: &str = "Additional Bundle!";

async fn hello_world() -> &'static str {
    HELLO_WORLD
}

async fn another() -> &'static str {
    ANOTHER
}

async fn additional() -> &'static str {
    ADDITIONAL
}

/// Resources mounted under `context_path`; an empty or `/` context mounts at the root.
pub fn router(context_path: &str) -> Router {
    let resources = Router::new()
        .route("/webresources/helloworld", get(hello_world))
        .route("/webresources/another", get(another))
        .route("/webresources/additional", get(additional));

    let context = context_path.trim_matches('/');
    if context.is_empty() {
        resources
    } else {
        Router::new().nest(&format!("/{context}"), resources)
    }
}
