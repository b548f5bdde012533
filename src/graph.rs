use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum GraphError {
    #[error("unparseable triple at line {line}: {text}")]
    Parse { line: usize, text: String },
}

/// One node or value in a metadata graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Term {
    Iri(String),
    Blank(String),
    Literal(String),
}

impl Term {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            Term::Iri(s) | Term::Blank(s) | Term::Literal(s) => s,
        }
    }

    /// Repository URIs end in the resource's uuid; pull it off.
    pub(crate) fn last_path_segment(&self) -> &str {
        self.as_str().rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Triple {
    pub(crate) subject: String,
    pub(crate) predicate: String,
    pub(crate) object: Term,
}

/// A bag of triples parsed from an N-Triples document, with just enough
/// query surface for membership lookups and the ordered-list walk. Not a
/// general RDF store on purpose.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    triples: Vec<Triple>,
}

impl Graph {
    pub(crate) fn parse(text: &str) -> Result<Self, GraphError> {
        let mut triples = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_err = || GraphError::Parse {
                line: idx + 1,
                text: raw.to_string(),
            };

            let (subject, rest) = take_node(line).ok_or_else(parse_err)?;
            let rest = rest.trim_start();
            let (predicate, rest) = take_iri(rest).ok_or_else(parse_err)?;
            let rest = rest.trim_start();
            let (object, rest) = take_term(rest).ok_or_else(parse_err)?;
            if rest.trim() != "." {
                return Err(parse_err());
            }
            triples.push(Triple {
                subject,
                predicate,
                object,
            });
        }
        Ok(Self { triples })
    }

    /// Objects of all triples matching the (optional) subject and the
    /// predicate, in document order.
    pub(crate) fn objects<'a, 'b>(
        &'a self,
        subject: Option<&'b str>,
        predicate: &'b str,
    ) -> impl Iterator<Item = &'a Term> {
        self.triples
            .iter()
            .filter(move |t| t.predicate == predicate)
            .filter(move |t| subject.is_none_or(|s| t.subject == s))
            .map(|t| &t.object)
    }

    pub(crate) fn first_object(&self, subject: Option<&str>, predicate: &str) -> Option<&Term> {
        self.objects(subject, predicate).next()
    }

    pub(crate) fn count(&self, subject: &str, predicate: &str) -> usize {
        self.objects(Some(subject), predicate).count()
    }
}

/// Subject position: IRI or blank node. Returns the node key and the rest
/// of the line.
fn take_node(input: &str) -> Option<(String, &str)> {
    if let Some(rest) = input.strip_prefix('<') {
        let end = rest.find('>')?;
        return Some((rest[..end].to_string(), &rest[end + 1..]));
    }
    if input.starts_with("_:") {
        let end = input
            .find(|c: char| c.is_whitespace())
            .unwrap_or(input.len());
        return Some((input[..end].to_string(), &input[end..]));
    }
    None
}

fn take_iri(input: &str) -> Option<(String, &str)> {
    let rest = input.strip_prefix('<')?;
    let end = rest.find('>')?;
    Some((rest[..end].to_string(), &rest[end + 1..]))
}

/// Object position: IRI, blank node, or literal (language tags and
/// datatype suffixes are accepted and dropped).
fn take_term(input: &str) -> Option<(Term, &str)> {
    if input.starts_with('<') {
        let (iri, rest) = take_iri(input)?;
        return Some((Term::Iri(iri), rest));
    }
    if input.starts_with("_:") {
        let (node, rest) = take_node(input)?;
        return Some((Term::Blank(node), rest));
    }
    let rest = input.strip_prefix('"')?;
    let mut value = String::new();
    let mut chars = rest.char_indices();
    let mut consumed = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                consumed = Some(i + 1);
                break;
            }
            '\\' => {
                let (_, esc) = chars.next()?;
                match esc {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '"' => value.push('"'),
                    '\\' => value.push('\\'),
                    other => value.push(other),
                }
            }
            other => value.push(other),
        }
    }
    let rest = &rest[consumed?..];
    // Skip @lang or ^^<datatype> suffixes.
    let rest = if let Some(tail) = rest.strip_prefix("@") {
        let end = tail
            .find(|c: char| c.is_whitespace())
            .unwrap_or(tail.len());
        &tail[end..]
    } else if let Some(tail) = rest.strip_prefix("^^") {
        let (_, tail) = take_iri(tail)?;
        tail
    } else {
        rest
    };
    Some((Term::Literal(value), rest))
}
