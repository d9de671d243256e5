//! Login page rendering.
//!
//! Templates are plain HTML with `{{name}}` placeholders. The login template
//! is read from disk once, on first use or at startup through
//! [`TemplateRenderer::init`]; concurrent callers wait for that single load.

use serde::Serialize;
use std::{
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

pub const LOGIN_TEMPLATE: &str = "login.html";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("error compiling template {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
}

/// Values exposed to the login template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoginParams {
    pub static_base_path: String,
    pub identity_endpoint: String,
    pub origin_url: String,
    pub csrf_token: String,
}

impl LoginParams {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "public" => Some(&self.static_base_path),
            "endpoint" => Some(&self.identity_endpoint),
            "origin" => Some(&self.origin_url),
            "csrf" => Some(&self.csrf_token),
            _ => None,
        }
    }
}

pub trait Renderer: Send + Sync {
    fn render<'a>(
        &'a self,
        template: &'a str,
        params: &'a LoginParams,
    ) -> Pin<Box<dyn Future<Output = Result<String, RenderError>> + Send + 'a>>;
}

#[derive(Debug)]
struct Template {
    source: String,
}

impl Template {
    async fn load(path: &Path) -> Result<Self, RenderError> {
        debug!("loading template {}", path.display());
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RenderError::Load {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self { source })
    }

    fn render(&self, params: &LoginParams) -> String {
        let mut out = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let name = rest[start + 2..start + 2 + len].trim();
            out.push_str(&rest[..start]);
            match params.lookup(name) {
                Some(value) => out.push_str(&escape_html(value)),
                // Unknown placeholders are kept verbatim.
                None => out.push_str(&rest[start..start + 4 + len]),
            }
            rest = &rest[start + 4 + len..];
        }

        out.push_str(rest);
        out
    }
}

/// Renders templates from a directory on disk.
#[derive(Debug)]
pub struct TemplateRenderer {
    dir: PathBuf,
    login: OnceCell<Template>,
}

impl TemplateRenderer {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            login: OnceCell::new(),
        }
    }

    /// Load the login template ahead of serving.
    ///
    /// # Errors
    /// Returns [`RenderError::Load`] if the template cannot be read.
    pub async fn init(&self) -> Result<(), RenderError> {
        self.login().await.map(|_| ())
    }

    async fn login(&self) -> Result<&Template, RenderError> {
        self.login
            .get_or_try_init(|| async move {
                let path = self.dir.join(LOGIN_TEMPLATE);
                Template::load(&path).await
            })
            .await
    }
}

impl Renderer for TemplateRenderer {
    fn render<'a>(
        &'a self,
        template: &'a str,
        params: &'a LoginParams,
    ) -> Pin<Box<dyn Future<Output = Result<String, RenderError>> + Send + 'a>> {
        Box::pin(async move {
            if template != LOGIN_TEMPLATE {
                return Err(RenderError::UnknownTemplate(template.to_string()));
            }
            Ok(self.login().await?.render(params))
        })
    }
}

pub(crate) fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    fn params() -> LoginParams {
        LoginParams {
            static_base_path: "/sso/static".to_string(),
            identity_endpoint: "https://api.travis-ci.org".to_string(),
            origin_url: "https://sso.example.com".to_string(),
            csrf_token: "a+b/c=".to_string(),
        }
    }

    fn temp_dir(source: Option<&str>) -> Result<TempDir> {
        let dir = tempfile::tempdir()?;
        if let Some(source) = source {
            std::fs::write(dir.path().join(LOGIN_TEMPLATE), source)?;
        }
        Ok(dir)
    }

    #[test]
    fn escape_html_escapes_specials() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&#34;x&#34;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn template_substitutes_known_placeholders() {
        let template = Template {
            source: "<link href=\"{{ public }}/app.css\"><b>{{csrf}}</b>{{other}} {{".to_string(),
        };
        assert_eq!(
            template.render(&params()),
            "<link href=\"/sso/static/app.css\"><b>a+b/c=</b>{{other}} {{"
        );
    }

    #[test]
    fn template_escapes_values() {
        let template = Template {
            source: "{{origin}}".to_string(),
        };
        let mut params = params();
        params.origin_url = "\"><script>".to_string();
        assert_eq!(template.render(&params), "&#34;&gt;&lt;script&gt;");
    }

    #[tokio::test]
    async fn renderer_loads_from_disk() -> Result<()> {
        let dir = temp_dir(Some("<form data-endpoint=\"{{endpoint}}\"></form>"))?;
        let renderer = TemplateRenderer::new(dir.path());
        renderer.init().await?;

        let html = renderer.render(LOGIN_TEMPLATE, &params()).await?;
        assert_eq!(html, "<form data-endpoint=\"https://api.travis-ci.org\"></form>");
        Ok(())
    }

    #[tokio::test]
    async fn renderer_loads_only_once() -> Result<()> {
        let dir = temp_dir(Some("first"))?;
        let renderer = TemplateRenderer::new(dir.path());
        assert_eq!(renderer.render(LOGIN_TEMPLATE, &params()).await?, "first");

        std::fs::write(dir.path().join(LOGIN_TEMPLATE), "second")?;
        assert_eq!(renderer.render(LOGIN_TEMPLATE, &params()).await?, "first");
        Ok(())
    }

    #[tokio::test]
    async fn missing_template_is_an_error() -> Result<()> {
        let dir = temp_dir(None)?;
        let renderer = TemplateRenderer::new(dir.path());
        assert!(matches!(
            renderer.init().await,
            Err(RenderError::Load { .. })
        ));
        assert!(matches!(
            renderer.render("other.html", &params()).await,
            Err(RenderError::UnknownTemplate(_))
        ));
        Ok(())
    }
}
