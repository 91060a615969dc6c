#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate microblog;

    use std::sync::Arc;

    use actix_web::{web, App, HttpServer, HttpRequest, HttpResponse};
    use microblog::config::Config;
    use microblog::core::db::{seed_demo_data, MemoryStore};
    use microblog::mail::LogTransport;
    use microblog::AppContext;
    use tracing::{error, info};
    use tracing_subscriber::{EnvFilter, fmt};

    mod adapter {
        use actix_web::HttpRequest;
        use spin_sdk::http::{Request, Method};

        pub fn actix_to_spin_request(
            req: &HttpRequest,
            body: actix_web::web::Bytes,
        ) -> anyhow::Result<Request> {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                other => anyhow::bail!("unsupported method {other}"),
            };

            let uri = req.uri().to_string();

            let mut req_builder = Request::builder();
            let mut with_headers = req_builder.method(method).uri(&uri);
            for (name, value) in req.headers() {
                if let Ok(val_str) = value.to_str() {
                    with_headers = with_headers.header(name.as_str(), val_str);
                }
            }

            Ok(with_headers.body(body.to_vec()).build())
        }

        pub fn spin_to_actix_response(spin_resp: spin_sdk::http::Response) -> actix_web::HttpResponse {
            let status = *spin_resp.status();

            let mut response = actix_web::HttpResponse::build(
                actix_web::http::StatusCode::from_u16(status)
                    .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
            );
            for (name, value) in spin_resp.headers() {
                if let Some(v) = value.as_str() {
                    response.insert_header((name, v));
                }
            }

            response.body(spin_resp.body().to_vec())
        }
    }

    struct State {
        store: MemoryStore,
        mailer: LogTransport,
        config: Config,
    }

    pub async fn run() -> std::io::Result<()> {
        fmt().with_env_filter(EnvFilter::from_default_env()).init();

        let config = Config::load();
        let store = MemoryStore::new();
        if config.seed_demo_data {
            if let Err(e) = seed_demo_data(&store) {
                error!("Failed to seed demo data: {e:#}");
            }
        }

        let address = config.bind_address.clone();
        let state = Arc::new(State { store, mailer: LogTransport, config });
        info!("Server listening on http://{address}");

        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::from(state.clone()))
                .default_service(web::route().to(handle_all))
        })
        .bind(&address)?
        .run()
        .await
    }

    async fn handle_all(state: web::Data<State>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
        let spin_req = match adapter::actix_to_spin_request(&req, body) {
            Ok(r) => r,
            Err(_) => {
                return HttpResponse::BadRequest()
                    .json(serde_json::json!({"error": "Invalid request"}))
            }
        };

        let ctx = AppContext {
            store: &state.store,
            mailer: &state.mailer,
            config: &state.config,
        };

        adapter::spin_to_actix_response(microblog::route(&ctx, spin_req))
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
