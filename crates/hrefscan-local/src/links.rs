use hrefscan_core::{Error, ExtractionResult, Result};

/// Schemes that never point at a fetchable resource.
const SKIPPED_SCHEMES: [&str; 3] = ["mailto", "skype", "tel"];

/// One element/attribute pair that carries a link.
///
/// Queries are "elements of this tag with the attribute present", yielding the
/// attribute values in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAttr {
    ScriptSrc,
    AnchorHref,
    LinkHref,
    FormAction,
}

impl LinkAttr {
    /// Collection order. Candidates are concatenated in this order.
    pub const ALL: [LinkAttr; 4] = [
        LinkAttr::ScriptSrc,
        LinkAttr::AnchorHref,
        LinkAttr::LinkHref,
        LinkAttr::FormAction,
    ];

    pub fn element(&self) -> &'static str {
        match self {
            LinkAttr::ScriptSrc => "script",
            LinkAttr::AnchorHref => "a",
            LinkAttr::LinkHref => "link",
            LinkAttr::FormAction => "form",
        }
    }

    pub fn attribute(&self) -> &'static str {
        match self {
            LinkAttr::ScriptSrc => "src",
            LinkAttr::AnchorHref | LinkAttr::LinkHref => "href",
            LinkAttr::FormAction => "action",
        }
    }

    pub fn values(&self, doc: &html_scraper::Html) -> Vec<String> {
        let css = format!("{}[{}]", self.element(), self.attribute());
        let sel = match html_scraper::Selector::parse(&css) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        doc.select(&sel)
            .filter_map(|el| el.value().attr(self.attribute()))
            .map(|v| v.to_string())
            .collect()
    }
}

/// Raw attribute values from every [`LinkAttr`], duplicates included.
pub fn collect_candidates(html: &str) -> Vec<String> {
    let doc = html_scraper::Html::parse_document(html);
    LinkAttr::ALL
        .iter()
        .flat_map(|attr| attr.values(&doc))
        .collect()
}

/// RFC 3986 scheme of `candidate`, if it has one (`ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"`).
fn scheme_of(candidate: &str) -> Option<&str> {
    let (scheme, _) = candidate.trim_start().split_once(':')?;
    let mut chars = scheme.chars();
    if !chars.next()?.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(scheme)
    } else {
        None
    }
}

/// In-page bookmarks, non-navigable schemes and the bare root.
pub fn is_skipped(candidate: &str) -> bool {
    if candidate.starts_with('#') || candidate == "/" {
        return true;
    }
    scheme_of(candidate).is_some_and(|s| SKIPPED_SCHEMES.iter().any(|k| s.eq_ignore_ascii_case(k)))
}

/// Base URL for relative resolution.
///
/// `url` validates it; joining works on the raw reference text with RFC 3986
/// section 5.2 so candidates are never percent-encoded or case-folded. Two
/// spellings of the same target stay two links.
#[derive(Debug, Clone)]
pub struct LinkBase<'a> {
    raw: &'a str,
    parsed: url::Url,
}

impl<'a> LinkBase<'a> {
    pub fn parse(base_url: &'a str) -> Result<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| Error::InvalidBaseUrl(format!("{base_url:?}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(Error::InvalidBaseUrl(format!(
                "{base_url:?} cannot be used to resolve relative links"
            )));
        }
        Ok(Self {
            raw: base_url,
            parsed,
        })
    }

    /// Absolute candidates come back untouched; anything else is joined onto the base.
    pub fn resolve(&self, candidate: &str) -> String {
        if scheme_of(candidate).is_some() {
            return candidate.to_string();
        }
        let candidate = candidate.trim_start();
        if candidate.is_empty() {
            return self.raw.to_string();
        }

        let (rest, fragment) = match candidate.split_once('#') {
            Some((r, f)) => (r, Some(f)),
            None => (candidate, None),
        };
        let (ref_path, ref_query) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (rest, None),
        };

        let scheme = self.parsed.scheme();
        let mut out = if let Some(net) = ref_path.strip_prefix("//") {
            let (authority, path) = match net.find('/') {
                Some(i) => net.split_at(i),
                None => (net, ""),
            };
            let mut s = format!("{scheme}://{authority}{}", remove_dot_segments(path));
            push_part(&mut s, '?', ref_query);
            s
        } else {
            let origin = &self.parsed[..url::Position::BeforePath];
            let base_path = self.parsed.path();
            let (path, query) = if ref_path.is_empty() {
                (base_path.to_string(), ref_query.or(self.parsed.query()))
            } else if ref_path.starts_with('/') {
                (remove_dot_segments(ref_path), ref_query)
            } else {
                (remove_dot_segments(&merge(&self.parsed, ref_path)), ref_query)
            };
            let mut s = format!("{origin}{path}");
            push_part(&mut s, '?', query);
            s
        };
        push_part(&mut out, '#', fragment);
        out
    }
}

fn push_part(s: &mut String, sep: char, part: Option<&str>) {
    if let Some(p) = part {
        s.push(sep);
        s.push_str(p);
    }
}

/// RFC 3986 5.2.3.
fn merge(base: &url::Url, ref_path: &str) -> String {
    let base_path = base.path();
    if base.has_host() && base_path.is_empty() {
        return format!("/{ref_path}");
    }
    match base_path.rfind('/') {
        Some(i) => format!("{}{ref_path}", &base_path[..=i]),
        None => ref_path.to_string(),
    }
}

/// RFC 3986 5.2.4.
fn remove_dot_segments(path: &str) -> String {
    let mut input = path;
    let mut out: Vec<&str> = Vec::new();
    while !input.is_empty() {
        if let Some(r) = input.strip_prefix("../") {
            input = r;
        } else if let Some(r) = input.strip_prefix("./") {
            input = r;
        } else if input.starts_with("/./") {
            input = &input[2..];
        } else if input == "/." {
            input = "/";
        } else if input.starts_with("/../") || input == "/.." {
            input = if input == "/.." { "/" } else { &input[3..] };
            out.pop();
        } else if input == "." || input == ".." {
            input = "";
        } else {
            let start = usize::from(input.starts_with('/'));
            let end = input[start..]
                .find('/')
                .map(|i| i + start)
                .unwrap_or(input.len());
            out.push(&input[..end]);
            input = &input[end..];
        }
    }
    out.concat()
}

/// Extract, filter, resolve and dedupe every link-bearing attribute in `html`.
///
/// Malformed markup is parsed best-effort and never fails. The only error is a
/// `base_url` that cannot serve as a base for relative references.
///
/// An empty `href=""` resolves to `base_url` itself and is kept.
// TODO: decide whether empty attribute values should be dropped like `#` anchors.
pub fn extract_links(html: &[u8], base_url: &str) -> Result<ExtractionResult> {
    let base = LinkBase::parse(base_url)?;

    let candidates = collect_candidates(&String::from_utf8_lossy(html));
    let raw = candidates.len();
    let resolved: Vec<String> = candidates
        .iter()
        .filter(|c| !is_skipped(c))
        .map(|c| base.resolve(c))
        .collect();
    tracing::debug!(
        raw,
        kept = resolved.len(),
        base = base_url,
        "collected link candidates"
    );

    Ok(ExtractionResult::from_resolved(resolved))
}
