use std::io::Write;
use std::path::Path;

use thiserror::Error;

use super::{Graph, Term};

// IANA link-relation IRIs plus the ORE proxy vocabulary used by the
// repository's list sources.
const FIRST: &str = "http://www.iana.org/assignments/relation/first";
const LAST: &str = "http://www.iana.org/assignments/relation/last";
const PREV: &str = "http://www.iana.org/assignments/relation/prev";
const NEXT: &str = "http://www.iana.org/assignments/relation/next";
const PROXY_FOR: &str = "http://www.openarchives.org/ore/terms/proxyFor";
const HAS_PART: &str = "http://purl.org/dc/terms/hasPart";

#[derive(Debug, Error)]
pub(crate) enum OrderingError {
    #[error("list source {0} declares no first proxy")]
    NoFirstProxyFound(String),

    #[error("first proxy of list source {0} has a prev relation")]
    FirstProxyHasPrev(String),

    #[error("proxy {0} has no proxy-for relation")]
    NoProxyUriFound(String),

    /// A node's prev pointer disagrees with the node we just walked from;
    /// the bidirectional chain is corrupt.
    #[error("next/prev proxy relations disagree while walking the list")]
    NextPreviousProxyMismatch,

    #[error("walked {actual} proxies but the list source declares {expected} parts")]
    ProxyCountIncorrect { expected: usize, actual: usize },

    #[error("walk did not end at the declared last proxy")]
    LastProxyFailsValidation,

    /// The traversal's member set disagrees with the entity's own
    /// membership list; the two metadata sources are out of sync.
    #[error("list source {0} file sets do not match the entity's members")]
    ListSourceFileSetMismatch(String),
}

/// The canonical ordering of an entity's file sets, rebuilt from the
/// linked list of proxy nodes in the list-source graph and cross-checked
/// against the independently known member set. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileSetOrdering {
    uuids: Vec<String>,
}

impl FileSetOrdering {
    /// Walk first → next → ... → last, validating the chain at every step
    /// and the collected set at the end.
    pub(crate) fn reconstruct(
        graph: &Graph,
        list_source: &str,
        reference: &[String],
    ) -> Result<Self, OrderingError> {
        let declared_parts = graph.count(list_source, HAS_PART);

        let first = graph
            .first_object(Some(list_source), FIRST)
            .map(node_key)
            .ok_or_else(|| OrderingError::NoFirstProxyFound(list_source.to_string()))?;
        if graph.first_object(Some(&first), PREV).is_some() {
            return Err(OrderingError::FirstProxyHasPrev(list_source.to_string()));
        }

        let mut uuids: Vec<String> = Vec::new();
        let mut current = first;
        loop {
            // Guard against cycles: never collect more nodes than the list
            // source declares parts, then let the count check report it.
            if uuids.len() > declared_parts {
                break;
            }
            uuids.push(proxy_uuid(graph, &current)?);

            let Some(next) = graph.first_object(Some(&current), NEXT).map(node_key) else {
                break;
            };
            let back = graph.first_object(Some(&next), PREV).map(node_key);
            if back.as_deref() != Some(current.as_str()) {
                return Err(OrderingError::NextPreviousProxyMismatch);
            }
            current = next;
        }

        if uuids.len() != declared_parts {
            return Err(OrderingError::ProxyCountIncorrect {
                expected: declared_parts,
                actual: uuids.len(),
            });
        }

        let declared_last = graph.first_object(Some(list_source), LAST).map(node_key);
        if declared_last.as_deref() != Some(current.as_str())
            || graph.first_object(Some(&current), NEXT).is_some()
        {
            return Err(OrderingError::LastProxyFailsValidation);
        }

        let mut collected = uuids.clone();
        let mut expected: Vec<String> = reference.to_vec();
        collected.sort();
        expected.sort();
        if collected != expected {
            return Err(OrderingError::ListSourceFileSetMismatch(
                list_source.to_string(),
            ));
        }

        Ok(Self { uuids })
    }

    pub(crate) fn uuids(&self) -> &[String] {
        &self.uuids
    }

    /// Write the ordering manifest that ships inside the bundle, so the
    /// processing order is reproducible from the packaged AIP alone.
    pub(crate) fn write_manifest(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "<file_order>")?;
        for uuid in &self.uuids {
            writeln!(file, "  <uuid>{uuid}</uuid>")?;
        }
        writeln!(file, "</file_order>")?;
        Ok(())
    }
}

fn node_key(term: &Term) -> String {
    term.as_str().to_string()
}

fn proxy_uuid(graph: &Graph, proxy: &str) -> Result<String, OrderingError> {
    graph
        .first_object(Some(proxy), PROXY_FOR)
        .map(|t| t.last_path_segment().to_string())
        .ok_or_else(|| OrderingError::NoProxyUriFound(proxy.to_string()))
}
