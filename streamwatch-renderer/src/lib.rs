//! # streamwatch-renderer
//!
//! Tera-based composer for every chat message the bot sends: live
//! announcements, restart notices and command failure reports.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use streamwatch_core::types::LiveEntity;
//! use streamwatch_renderer::{AnnouncementContext, Renderer};
//!
//! fn announce(entity: &LiveEntity) {
//!     if let Ok(renderer) = Renderer::new() {
//!         let ctx = AnnouncementContext::from_entity(entity, None, "1234", 1, Utc::now());
//!         if let Ok(message) = renderer.announcement(&ctx) {
//!             println!("{:?}", message.content);
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{AnnouncementContext, CommandErrorContext, RestartContext};
pub use engine::{escape_markdown, MessageKind, Renderer, TemplateEngine};
pub use error::RenderError;
