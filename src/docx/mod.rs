//! OOXML plumbing: the zip container, an editable XML tree, relationships,
//! content types, and text views.
//!
//! Nothing here knows about offers; the pipeline stages build on it.

pub mod package;
pub mod rels;
pub mod text;
pub mod xml;

pub use package::DocxPackage;
pub use rels::{ContentTypes, Relationship, Relationships};
pub use xml::{Element, XmlDocument, XmlNode};
