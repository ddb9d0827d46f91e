//! Static file serving: walks a directory at
//! compile time and registers one static route per file, with
//! Content-Type-by-extension, an optional `Cache-Control`, and an `ETag`
//! computed as the hex MD5 digest of the file's content.

use crate::response::HeaderMap;
use crate::route::{Method, PathTemplate, Route, RouteFlags};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct StaticDirOptions {
    pub cache_control: Option<String>,
}

/// Walk `dir` and produce one `Route` per regular file found, mounted under
/// `prefix` (e.g. `prefix = "/assets"`, a file at `dir/css/app.css` becomes
/// `/assets/css/app.css`). Every generated route is static: its body, ETag,
/// and Content-Type are fixed at registration time and rendered once by the
/// code generator, exactly like any other static route.
pub fn static_dir(prefix: &str, dir: &Path, opts: &StaticDirOptions) -> std::io::Result<Vec<Route>> {
    let mut routes = Vec::new();
    walk(dir, dir, prefix, opts, &mut routes)?;
    Ok(routes)
}

fn walk(root: &Path, dir: &Path, prefix: &str, opts: &StaticDirOptions, out: &mut Vec<Route>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, prefix, opts, out)?;
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(&path);
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        let route_path = format!("{}/{}", prefix.trim_end_matches('/'), relative_str);

        let content = std::fs::read(&path)?;
        let content_type = mime_guess::from_path(&path).first_or_octet_stream().to_string();
        let etag = format!("\"{:x}\"", md5::compute(&content));
        let cache_control = opts.cache_control.clone();

        let handler_content = content;
        let handler: crate::route::HandlerFn = Arc::new(move |_req| {
            let mut headers = HeaderMap::new();
            headers.insert("Content-Type", content_type.clone());
            headers.insert("ETag", etag.clone());
            if let Some(cc) = &cache_control {
                headers.insert("Cache-Control", cc.clone());
            }
            crate::response::HandlerOutput::full(200, headers, handler_content.clone())
        });

        out.push(Route {
            method: Method::Get,
            template: PathTemplate::parse(&route_path)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad static path"))?,
            handler,
            flags: RouteFlags::default().normalize(),
            before: Vec::new(),
            after: Vec::new(),
            native_before: Vec::new(),
            native_after: Vec::new(),
            index: 0,
        });
    }
    Ok(())
}
