//! Page rendering
//!
//! One embedded Tera template serves the landing page (login and register
//! forms, optional error) and the logged-in greeting. Rendering never fails
//! from the caller's point of view: a template error degrades to a static
//! fallback page.

use anyhow::{Context, Result};
use serde::Serialize;
use tera::{Context as TeraContext, Tera};

const INDEX_TEMPLATE_NAME: &str = "index.html";
const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");

/// Which form the page should highlight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormKind {
    Login,
    Register,
}

/// Variables available to `index.html`
#[derive(Debug, Default, Serialize)]
pub struct IndexPage<'a> {
    pub error: Option<&'a str>,
    pub path: Option<FormKind>,
    pub is_logged: bool,
    pub username: Option<&'a str>,
}

impl<'a> IndexPage<'a> {
    /// Landing page re-rendered after a failed form submission
    pub fn with_error(path: FormKind, error: &'a str) -> Self {
        Self {
            error: Some(error),
            path: Some(path),
            ..Self::default()
        }
    }

    /// Greeting shown on `/{username}`
    pub fn logged_in(username: &'a str) -> Self {
        Self {
            is_logged: true,
            username: Some(username),
            ..Self::default()
        }
    }
}

/// Template renderer
pub struct Views {
    tera: Tera,
}

impl Views {
    /// Compile the embedded templates
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(INDEX_TEMPLATE_NAME, INDEX_TEMPLATE)
            .context("Failed to compile index template")?;
        Ok(Self { tera })
    }

    /// Render the index page, falling back to a static page on error
    pub fn render_index(&self, page: &IndexPage<'_>) -> String {
        let result = TeraContext::from_serialize(page)
            .and_then(|context| self.tera.render(INDEX_TEMPLATE_NAME, &context));

        match result {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Failed to render template '{}': {}", INDEX_TEMPLATE_NAME, e);
                fallback_page()
            }
        }
    }
}

fn fallback_page() -> String {
    r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Playopia</title>
</head>
<body>
    <h1>Something went wrong</h1>
    <p>The page could not be displayed. <a href="/">Back to the start page</a>.</p>
</body>
</html>"#
        .to_string()
}
