//! XML definitions to [`Element`] trees.
//!
//! Elements without a namespace belong to the core namespace. Attribute
//! namespaces are dropped, text and comments are ignored.

use std::path::Path;

use thiserror::Error;
use tumult_core::{CORE_NAMESPACE, Element, QualifiedName};

/// Failure to read or parse a definition.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed XML.
    #[error(transparent)]
    Xml(#[from] roxmltree::Error),
}

/// Parse a definition document.
pub fn parse_definition(text: &str) -> Result<Element, LoadError> {
    let doc = roxmltree::Document::parse(text)?;
    Ok(convert(doc.root_element()))
}

/// Read and parse a definition file.
pub async fn load_definition(path: &Path) -> Result<Element, LoadError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Io { path: path.display().to_string(), source })?;
    parse_definition(&text)
}

fn convert(node: roxmltree::Node<'_, '_>) -> Element {
    let tag = node.tag_name();
    let mut element =
        Element::new(QualifiedName::new(tag.namespace().unwrap_or(CORE_NAMESPACE), tag.name()));
    for attribute in node.attributes() {
        element.set_attr(attribute.name(), attribute.value());
    }
    for child in node.children().filter(roxmltree::Node::is_element) {
        element.push_child(convert(child));
    }
    element
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqualified_elements_are_core() {
        let root = parse_definition(r#"<Model main="Main"><Activities/></Model>"#).unwrap();
        assert!(root.name().is_core("Model"));
        assert_eq!(root.attr("main"), Some("Main"));
        assert!(root.children()[0].name().is_core("Activities"));
    }

    #[test]
    fn namespaced_elements_keep_their_namespace() {
        let root = parse_definition(
            r#"<Model xmlns:p="urn:tumult:loopback"><Actors><p:Loopback id="L" count="2"/></Actors></Model>"#,
        )
        .unwrap();
        let actor = &root.children()[0].children()[0];
        assert_eq!(actor.name(), &QualifiedName::new("urn:tumult:loopback", "Loopback"));
        assert_eq!(actor.attr("count"), Some("2"));
    }

    #[test]
    fn text_and_comments_are_skipped() {
        let root = parse_definition("<Model>\n  <!-- note -->\n  text\n  <Events/>\n</Model>").unwrap();
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(matches!(parse_definition("<Model>"), Err(LoadError::Xml(_))));
    }
}
