//! # mailingest-mime
//!
//! Best-effort MIME parsing and display reconstruction for ingested email.
//!
//! ## Features
//!
//! - **Parsing**: [`parse`] turns raw RFC 5322 bytes into a [`ParsedEmail`]
//!   and never fails; broken parts are skipped, broken headers fall back to
//!   their raw text
//! - **Decoding**: Base64, Quoted-Printable, RFC 2047/2231 and charset
//!   conversion through an explicit fallback chain ([`encoding::decode_text`])
//! - **Reconstruction**: [`reconstruct`] produces a self-contained HTML
//!   document with inline images resolved to data URIs
//!
//! ## Quick Start
//!
//! ```
//! let raw = b"From: Alice <alice@example.com>\r\n\
//!             To: team@corp.example\r\n\
//!             Subject: Hello\r\n\
//!             Content-Type: text/plain\r\n\
//!             \r\n\
//!             Hi team";
//!
//! let parsed = mailingest_mime::parse(raw);
//! assert_eq!(parsed.info.sender_address(), "alice@example.com");
//! assert_eq!(parsed.content.text, "Hi team");
//!
//! let html = mailingest_mime::reconstruct(&parsed.content);
//! assert!(html.contains("email-container"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod content_type;
mod email;
mod error;
mod header;
mod message;
mod reconstruct;

pub mod encoding;

pub use address::{contains_domain, extract_address};
pub use content_type::{ContentType, Disposition, DispositionKind};
pub use email::{Attachment, EmailContent, EmailInfo, EmbeddedImage, ParsedEmail, parse};
pub use error::{Error, Result};
pub use header::{Headers, parse_date, split_header_body};
pub use message::{Body, Entity, TransferEncoding, split_multipart};
pub use reconstruct::{
    PLACEHOLDER_HTML, VIEW_MARKER, add_display_styles, inline_images, reconstruct, wrap_text,
};
