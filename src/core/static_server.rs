use spin_sdk::http::Response;
use rust_embed::RustEmbed;
use mime_guess::from_path;

use crate::core::errors::ApiError;

#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

pub fn serve_static(path: &str) -> anyhow::Result<Response> {
    let file_path = match path {
        "/" | "/index" | "/index.html" => "index.html",
        _ => path.trim_start_matches('/'),
    };

    let file = match Assets::get(file_path) {
        Some(file) => file,
        None => return Ok(ApiError::NotFound("File not found".to_string()).into()),
    };

    let mime = from_path(file_path).first_or_octet_stream();

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", mime.as_ref())
        .body(file.data.to_vec())
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_aliases() {
        for path in ["/", "/index", "/index.html"] {
            let resp = serve_static(path).unwrap();
            assert_eq!(*resp.status(), 200);
        }
    }

    #[test]
    fn missing_asset_is_404() {
        let resp = serve_static("/nope.js").unwrap();
        assert_eq!(*resp.status(), 404);
    }
}
