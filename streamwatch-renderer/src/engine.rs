//! Tera rendering engine: [`MessageKind`] enum and [`Renderer`].
//!
//! | Kind               | Template(s)                                          |
//! |--------------------|------------------------------------------------------|
//! | Announcement       | `announcement/content.tera`, `announcement/description.tera` |
//! | RestartComplete    | `restart/complete.tera`                              |
//! | CommandError       | `report/command_error.tera`                          |
//! | AccessDenied       | `report/access_denied.tera`                          |
//!
//! Any of these can be overridden by dropping a file with the same relative
//! name into the configured template directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tera::Tera;

use streamwatch_core::types::{Embed, EmbedAuthor, OutgoingMessage};

use crate::context::{AnnouncementContext, CommandErrorContext, RestartContext};
use crate::error::RenderError;

/// Embed colours.
pub const COLOR_PURPLE: u32 = 0x9B59B6;
pub const COLOR_RED: u32 = 0xE74C3C;
pub const COLOR_BLUE: u32 = 0x3498DB;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    (
        "announcement/content.tera",
        include_str!("templates/announcement/content.tera"),
    ),
    (
        "announcement/description.tera",
        include_str!("templates/announcement/description.tera"),
    ),
    ("restart/complete.tera", include_str!("templates/restart/complete.tera")),
    (
        "report/command_error.tera",
        include_str!("templates/report/command_error.tera"),
    ),
    (
        "report/access_denied.tera",
        include_str!("templates/report/access_denied.tera"),
    ),
];

// ---------------------------------------------------------------------------
// Markdown escaping
// ---------------------------------------------------------------------------

const MARKDOWN_CHARS: &[char] = &['\\', '*', '_', '~', '`', '|', '>'];

/// Escape chat markdown control characters so user-supplied text renders literally.
pub fn escape_markdown(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if MARKDOWN_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_markdown_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(escape_markdown(s))),
        other => Ok(other.clone()),
    }
}

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(
            normalize_template_name(Path::new(name)),
            (*content).to_string(),
        );
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    tera.register_filter("escape_markdown", escape_markdown_filter);
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Every message the bot composes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Announcement,
    RestartComplete,
    CommandError,
    AccessDenied,
}

impl MessageKind {
    /// All kinds in a stable order.
    pub fn all() -> &'static [MessageKind] {
        &[
            MessageKind::Announcement,
            MessageKind::RestartComplete,
            MessageKind::CommandError,
            MessageKind::AccessDenied,
        ]
    }

    /// Template name(s) rendered for this kind.
    pub fn template_names(&self) -> &'static [&'static str] {
        match self {
            MessageKind::Announcement    => &[
                "announcement/content.tera",
                "announcement/description.tera",
            ],
            MessageKind::RestartComplete => &["restart/complete.tera"],
            MessageKind::CommandError    => &["report/command_error.tera"],
            MessageKind::AccessDenied    => &["report/access_denied.tera"],
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering templates with optional user overrides.
///
/// `user_template_dir` may contain `.tera` files that override embedded defaults.
/// Template names are normalised to lowercase and relative paths.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Construct a new [`TemplateEngine`], loading embedded templates plus any
    /// overrides found in `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera })
    }

    /// Render one named template, trimming the trailing newline templates end with.
    pub fn render(&self, name: &str, ctx: &tera::Context) -> Result<String, RenderError> {
        let rendered = self.tera.render(name, ctx)?;
        Ok(rendered.replace("\r\n", "\n").trim_end().to_string())
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Composes outgoing chat messages. Create once and reuse.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// Construct a new [`Renderer`] with embedded templates.
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(None)? })
    }

    /// Construct a [`Renderer`] whose templates may be overridden from `dir`.
    pub fn with_template_dir(dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(dir)? })
    }

    /// The "has gone live" message: mention text plus a purple embed.
    pub fn announcement(&self, ctx: &AnnouncementContext) -> Result<OutgoingMessage, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let content = self.engine.render("announcement/content.tera", &tera_ctx)?;
        let description = self.engine.render("announcement/description.tera", &tera_ctx)?;

        let embed = Embed {
            title: Some(escape_markdown(&ctx.title)),
            description: Some(description),
            url: Some(ctx.owner_url.clone()),
            color: Some(COLOR_PURPLE),
            author: Some(EmbedAuthor {
                name: ctx.owner_name.clone(),
                url: Some(ctx.owner_url.clone()),
                icon_url: ctx.owner_icon_url.clone(),
            }),
            image_url: Some(ctx.image_url.clone()),
            timestamp: Some(ctx.timestamp),
        };

        Ok(OutgoingMessage {
            content: Some(content),
            embed: Some(embed),
            reply_to: None,
        })
    }

    /// The blue "restart complete" embed. The caller decides what it replies to.
    pub fn restart_complete(&self, elapsed: Duration) -> Result<OutgoingMessage, RenderError> {
        let tera_ctx = RestartContext::from_elapsed(elapsed).to_tera_context()?;
        let description = self.engine.render("restart/complete.tera", &tera_ctx)?;
        Ok(OutgoingMessage::embed(Embed {
            description: Some(description),
            color: Some(COLOR_BLUE),
            ..Default::default()
        }))
    }

    /// The red "Bot Error" embed posted to the admin channel.
    pub fn command_error(&self, ctx: &CommandErrorContext) -> Result<Embed, RenderError> {
        let description = self
            .engine
            .render("report/command_error.tera", &ctx.to_tera_context()?)?;
        Ok(Embed {
            title: Some("Bot Error".to_string()),
            description: Some(description),
            color: Some(COLOR_RED),
            ..Default::default()
        })
    }

    /// The red "Access Denied" embed returned to the user who failed checks.
    pub fn access_denied(&self, failed_checks: &[String]) -> Result<Embed, RenderError> {
        let mut tera_ctx = tera::Context::new();
        tera_ctx.insert("failed_checks", failed_checks);
        let description = self.engine.render("report/access_denied.tera", &tera_ctx)?;
        Ok(Embed {
            title: Some("Access Denied".to_string()),
            description: Some(description),
            color: Some(COLOR_RED),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
