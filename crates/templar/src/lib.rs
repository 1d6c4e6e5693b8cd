//! # Templar - Cached Template Rendering
//!
//! `templar` sits in front of the MiniJinja engine and decides which compiled
//! configuration and which template source each render uses, and when that
//! work can be reused.
//!
//! ## Core Concepts
//!
//! - [`TemplateService`]: the façade a host builds once and shares
//! - [`Configuration`]: one root path's engine environment, auto-includes,
//!   auto-imports, shared variables and formatting settings
//! - [`ConfigurationRegistry`]: at most one configuration per root path
//! - [`source::SourceResolver`]: the filesystem (or host context) first, then
//!   an in-memory overlay of literal template text
//! - [`ContentHasher`]: keys anonymous templates by their text
//! - [`HtmlTemplate`]: render output with bookmark substitution
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use templar::{Locale, TemplateService};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Page {
//!     title: String,
//!     published: String,
//! }
//!
//! let service = TemplateService::builder()
//!     .root("templates/")
//!     .update_delay(30)
//!     .shared_variable("site", "Portal")
//!     .build();
//!
//! let page = Page { title: "News".into(), published: "2024-05-01".into() };
//!
//! // templates/page.html
//! let html = service.load_template_with("templates/", "page.html", &page).unwrap();
//!
//! // Same template, dates formatted for France.
//! let html_fr = service
//!     .load_template_localized("templates/", "page.html", &Locale::new("fr_FR"), &page)
//!     .unwrap();
//!
//! // Literal text, keyed by digest and cached.
//! let inline = service
//!     .load_template_from_string("<h1>{{ title }}</h1>", &page)
//!     .unwrap();
//! # let _ = (html, html_fr, inline);
//! ```
//!
//! ## Extensions
//!
//! Auto-includes, auto-imports and shared variables registered on the service
//! apply to configurations built afterwards. Call
//! [`TemplateService::reset_configuration`] to rebuild cached ones, or use the
//! `*_to_default` calls to change the default configuration in place.
//!
//! ## Logging
//!
//! The crate emits `tracing` events and never installs a subscriber.

pub mod cache;
mod config;
mod configuration;
mod engine;
mod error;
mod extensions;
pub mod format;
pub mod hash;
pub mod host;
mod html;
mod registry;
mod service;
pub mod source;

pub use config::{KeyStrategy, ServiceConfig, DEFAULT_UPDATE_DELAY_SECS};
pub use configuration::{Configuration, ConfigurationSettings, Refresh};
pub use error::{Error, RenderError, Result};
pub use extensions::{ExtensionSnapshot, PluginExtensions};
pub use format::{DATE_FORMAT_KEY, NUMBER_FORMAT_PATTERN};
pub use hash::{ContentHasher, HashingUnavailable, RawTextKey, Sha256Hasher};
pub use host::{
    DatePatternProvider, DeploymentContext, HostContext, Locale, PathResolver,
    StandardDatePatterns, WorkingDirResolver,
};
pub use html::HtmlTemplate;
pub use registry::ConfigurationRegistry;
pub use service::{TemplateService, TemplateServiceBuilder};
