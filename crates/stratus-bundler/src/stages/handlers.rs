use async_trait::async_trait;
use indexmap::IndexSet;
use stratus_config::Handler;

use super::{ids, js_string, short_hash};
use crate::Result;
use crate::context::BuildContext;
use crate::pipeline::{Stage, StageOutput};

/// Generates the ordered runtime handler table.
#[derive(Debug, Default)]
pub struct HandlersStage;

fn import_id(handler: &str, lazy: bool) -> String {
    let prefix = if lazy { "_lazy_" } else { "_" };
    format!("{prefix}{}", short_hash(handler))
}

/// The handler table module for `handlers`, in order.
pub fn handlers_module(handlers: &[Handler]) -> String {
    let eager: IndexSet<&str> = handlers
        .iter()
        .filter(|h| !h.lazy)
        .map(|h| h.handler.as_str())
        .collect();
    let lazy: IndexSet<&str> = handlers
        .iter()
        .filter(|h| h.lazy)
        .map(|h| h.handler.as_str())
        .collect();

    let imports: Vec<String> = eager
        .iter()
        .map(|h| format!("import {} from {};", import_id(h, false), js_string(h)))
        .collect();
    let lazy_imports: Vec<String> = lazy
        .iter()
        .map(|h| format!("const {} = () => import({});", import_id(h, true), js_string(h)))
        .collect();
    let rows: Vec<String> = handlers
        .iter()
        .map(|h| {
            let method = h
                .method
                .map_or_else(|| "undefined".to_string(), |m| format!("\"{m}\""));
            format!(
                "  {{ route: {}, handler: {}, lazy: {}, middleware: {}, method: {method} }}",
                js_string(&h.route),
                import_id(&h.handler, h.lazy),
                h.lazy,
                h.middleware
            )
        })
        .collect();

    format!(
        "{}\n\n{}\n\nexport const handlers = [\n{}\n];",
        imports.join("\n"),
        lazy_imports.join("\n"),
        rows.join(",\n")
    )
    .trim()
    .to_string()
}

fn log_table(ctx: &BuildContext, handlers: &[Handler]) {
    if handlers.is_empty() || !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    for h in handlers {
        let route = if h.route.is_empty() || h.route == "/" { "*" } else { h.route.as_str() };
        let handler = std::path::Path::new(&h.handler)
            .strip_prefix(&ctx.options.root_dir)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| h.handler.clone());
        tracing::debug!(
            route,
            handler = %handler,
            lazy = h.lazy,
            middleware = h.middleware,
            method = ?h.method,
            "handler"
        );
    }
}

#[async_trait]
impl Stage for HandlersStage {
    fn name(&self) -> &'static str {
        "handlers"
    }

    fn contribute(&self, ctx: &BuildContext) -> Result<StageOutput> {
        let mut handlers = Vec::with_capacity(ctx.handlers.len() + 2);
        if ctx.options.serve_static {
            handlers.push(Handler {
                route: String::new(),
                handler: ids::STATIC_HANDLER.to_string(),
                method: None,
                lazy: false,
                middleware: true,
            });
        }
        handlers.extend(ctx.handlers.iter().cloned());
        if let Some(renderer) = &ctx.options.renderer {
            handlers.push(Handler {
                route: "/**".to_string(),
                handler: renderer.to_string_lossy().into_owned(),
                method: None,
                lazy: true,
                middleware: false,
            });
        }
        log_table(ctx, &handlers);

        Ok(StageOutput::default().module(ids::SERVER_HANDLERS, handlers_module(&handlers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use stratus_config::HttpMethod;

    fn handler(route: &str, path: &str, method: Option<HttpMethod>, lazy: bool, middleware: bool) -> Handler {
        Handler {
            route: route.into(),
            handler: path.into(),
            method,
            lazy,
            middleware,
        }
    }

    #[test]
    fn handler_table() {
        let handlers = vec![
            handler("", "/app/middleware/auth.ts", None, false, true),
            handler("/api/x", "/app/api/x.get.ts", Some(HttpMethod::Get), true, false),
            handler("/api/x", "/app/api/x.post.ts", Some(HttpMethod::Post), true, false),
            handler("/**", "/app/routes/[...].ts", None, true, false),
            handler("/**", "/app/renderer.ts", None, true, false),
        ];
        let code = handlers_module(&handlers);
        let ids = Regex::new(r"\b_(lazy_)?[0-9a-f]{8}\b").unwrap();
        let code = ids.replace_all(&code, "_${1}ID");

        insta::assert_snapshot!(code, @r#"
import _ID from "/app/middleware/auth.ts";

const _lazy_ID = () => import("/app/api/x.get.ts");
const _lazy_ID = () => import("/app/api/x.post.ts");
const _lazy_ID = () => import("/app/routes/[...].ts");
const _lazy_ID = () => import("/app/renderer.ts");

export const handlers = [
  { route: "", handler: _ID, lazy: false, middleware: true, method: undefined },
  { route: "/api/x", handler: _lazy_ID, lazy: true, middleware: false, method: "get" },
  { route: "/api/x", handler: _lazy_ID, lazy: true, middleware: false, method: "post" },
  { route: "/**", handler: _lazy_ID, lazy: true, middleware: false, method: undefined },
  { route: "/**", handler: _lazy_ID, lazy: true, middleware: false, method: undefined }
];
"#);
    }

    #[test]
    fn shared_paths_share_one_import() {
        let handlers = vec![
            handler("/a", "/app/h.ts", None, true, false),
            handler("/b", "/app/h.ts", None, true, false),
        ];
        let code = handlers_module(&handlers);
        assert_eq!(code.matches(r#"import("/app/h.ts")"#).count(), 1);
        let id = import_id("/app/h.ts", true);
        assert_eq!(code.matches(&id).count(), 3);
    }

    #[test]
    fn serve_static_goes_first() {
        let dir = tempfile::tempdir().unwrap();
        let options = stratus_config::load_options(
            serde_json::json!({ "serveStatic": true }),
            &stratus_config::Environment::new(dir.path()),
        )
        .unwrap();
        let ctx = BuildContext::new(
            std::sync::Arc::new(options),
            vec![handler("/api/x", "/app/api/x.ts", None, true, false)],
        );
        let output = HandlersStage.contribute(&ctx).unwrap();
        let code = output.modules[0].1.render().unwrap();
        let first_row = code.lines().find(|l| l.trim_start().starts_with("{ route")).unwrap();
        assert!(first_row.contains("middleware: true"));
        assert!(code.contains("import _"));
        assert!(code.contains(r##"from "#internal/stratus/static";"##));
    }

    #[test]
    fn renderer_is_the_last_lazy_catch_all() {
        let dir = tempfile::tempdir().unwrap();
        let options = stratus_config::load_options(
            serde_json::json!({ "serveStatic": false, "renderer": "./renderer.ts" }),
            &stratus_config::Environment::new(dir.path()),
        )
        .unwrap();
        let renderer = dir.path().join("renderer.ts");
        let ctx = BuildContext::new(
            std::sync::Arc::new(options),
            vec![handler("/api/x", "/app/api/x.ts", None, true, false)],
        );
        let code = HandlersStage.contribute(&ctx).unwrap().modules[0].1.render().unwrap();

        let rows: Vec<&str> = code
            .lines()
            .filter(|l| l.trim_start().starts_with("{ route"))
            .collect();
        assert_eq!(rows.len(), 2);
        let id = import_id(&renderer.to_string_lossy(), true);
        assert!(rows[1].starts_with(&format!(r#"  {{ route: "/**", handler: {id}, lazy: true"#)));
        assert!(code.contains(&format!(
            "const {id} = () => import({});",
            js_string(&renderer.to_string_lossy())
        )));
    }

    #[test]
    fn quoted_paths_stay_valid_literals() {
        let handlers = vec![handler(
            "/api/it's",
            "/app/api/it's.get.ts",
            Some(HttpMethod::Get),
            true,
            false,
        )];
        let code = handlers_module(&handlers);
        assert!(code.contains(r#"import("/app/api/it's.get.ts")"#));
        assert!(code.contains(r#"route: "/api/it's""#));
    }
}
