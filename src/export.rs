use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;

use crate::catalog::CatalogTree;
use crate::error::CatalogError;
use crate::report::{ProgressEvent, ProgressSink, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Catalog,
    Collection,
    Item,
}

/// One catalog document ready to be sent to a remote catalog service.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDocument {
    pub kind: DocumentKind,
    pub id: String,
    /// Parent catalog for family catalogs, owning collection for items.
    pub parent: Option<String>,
    pub body: Value,
}

/// Remote catalog service accepting catalog documents.
///
/// `create` and `replace` return the HTTP status; transport failures are
/// errors.
pub trait ExportTarget {
    fn create(&self, document: &ExportDocument) -> Result<u16, CatalogError>;
    fn replace(&self, document: &ExportDocument) -> Result<u16, CatalogError>;
    fn refresh_auth(&self) -> Result<(), CatalogError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishAction {
    Created,
    Updated,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub kind: DocumentKind,
    pub id: String,
    pub parent: Option<String>,
    pub action: PublishAction,
    pub status: Option<u16>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub outcomes: Vec<PublishOutcome>,
}

impl ExportReport {
    pub fn count(&self, action: PublishAction) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.action == action)
            .count()
    }
}

const CONFLICT: u16 = 409;
const UNAUTHORIZED: u16 = 401;

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Flattens the tree in publish order: root, family catalogs, collections,
/// then items.
pub fn export_documents(tree: &CatalogTree) -> Result<Vec<ExportDocument>, CatalogError> {
    let root = tree.root();
    let mut documents = vec![ExportDocument {
        kind: DocumentKind::Catalog,
        id: root.id.clone(),
        parent: None,
        body: to_value(&root.id, root)?,
    }];
    for family in tree.families() {
        documents.push(ExportDocument {
            kind: DocumentKind::Catalog,
            id: family.catalog.id.clone(),
            parent: Some(root.id.clone()),
            body: to_value(&family.catalog.id, &family.catalog)?,
        });
    }
    for family in tree.families() {
        for node in &family.collections {
            documents.push(ExportDocument {
                kind: DocumentKind::Collection,
                id: node.collection.id.clone(),
                parent: None,
                body: to_value(&node.collection.id, &node.collection)?,
            });
        }
    }
    for (_, node, item) in tree.all_items() {
        documents.push(ExportDocument {
            kind: DocumentKind::Item,
            id: item.id.clone(),
            parent: Some(node.collection.id.clone()),
            body: to_value(&item.id, item)?,
        });
    }
    Ok(documents)
}

fn to_value<T: Serialize>(id: &str, document: &T) -> Result<Value, CatalogError> {
    serde_json::to_value(document).map_err(|err| CatalogError::Encode {
        what: id.to_string(),
        message: err.to_string(),
    })
}

/// Publishes every document of the tree; one failure never stops the rest.
pub fn publish_tree(
    tree: &CatalogTree,
    target: &dyn ExportTarget,
    sink: &dyn ProgressSink,
) -> Result<ExportReport, CatalogError> {
    let documents = export_documents(tree)?;
    sink.event(ProgressEvent::new(
        Severity::Info,
        format!("phase=Publish; {} documents", documents.len()),
    ));
    let outcomes = documents
        .iter()
        .map(|document| publish_document(target, document, sink))
        .collect();
    Ok(ExportReport { outcomes })
}

/// Creates the document, replacing it on conflict.
pub fn publish_document(
    target: &dyn ExportTarget,
    document: &ExportDocument,
    sink: &dyn ProgressSink,
) -> PublishOutcome {
    let mut outcome = PublishOutcome {
        kind: document.kind,
        id: document.id.clone(),
        parent: document.parent.clone(),
        action: PublishAction::Failed,
        status: None,
        message: None,
    };
    match try_publish(target, document) {
        Ok((action, status)) => {
            sink.info(&document.id, format!("{:?} {} ({status})", document.kind, action_label(action)));
            outcome.action = action;
            outcome.status = Some(status);
        }
        Err(err) => {
            sink.error(&document.id, format!("publish failed: {err}"));
            if let CatalogError::HttpStatus { status, .. } = &err {
                outcome.status = Some(*status);
            }
            outcome.message = Some(err.to_string());
        }
    }
    outcome
}

fn action_label(action: PublishAction) -> &'static str {
    match action {
        PublishAction::Created => "created",
        PublishAction::Updated => "updated",
        PublishAction::Failed => "failed",
    }
}

fn try_publish(
    target: &dyn ExportTarget,
    document: &ExportDocument,
) -> Result<(PublishAction, u16), CatalogError> {
    let mut refreshed = false;
    let status = with_auth_retry(target, &mut refreshed, || target.create(document))?;
    if is_success(status) {
        return Ok((PublishAction::Created, status));
    }
    if status == CONFLICT {
        let status = with_auth_retry(target, &mut refreshed, || target.replace(document))?;
        if is_success(status) {
            return Ok((PublishAction::Updated, status));
        }
        return Err(CatalogError::HttpStatus {
            url: document.id.clone(),
            status,
        });
    }
    Err(CatalogError::HttpStatus {
        url: document.id.clone(),
        status,
    })
}

/// Authorization is refreshed at most once per document.
fn with_auth_retry(
    target: &dyn ExportTarget,
    refreshed: &mut bool,
    call: impl Fn() -> Result<u16, CatalogError>,
) -> Result<u16, CatalogError> {
    let status = call()?;
    if status == UNAUTHORIZED && !*refreshed {
        *refreshed = true;
        target.refresh_auth()?;
        return call();
    }
    Ok(status)
}

/// Keeps only links with `rel`, pointing them at `href`.
pub fn rewrite_links(body: &mut Value, rel: &str, href: &str) {
    let Some(links) = body.get_mut("links").and_then(Value::as_array_mut) else {
        return;
    };
    links.retain(|link| link.get("rel").and_then(Value::as_str) == Some(rel));
    for link in links.iter_mut() {
        link["href"] = Value::String(href.to_string());
    }
}

pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<String, CatalogError>;
}

/// Reads the bearer token from an environment variable on every refresh.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenSource for EnvToken {
    fn token(&self) -> Result<String, CatalogError> {
        std::env::var(&self.var).map_err(|_| CatalogError::ConfigValue(format!("{} is not set", self.var)))
    }
}

/// Catalog service speaking the `catalogs/` and `collections/` REST layout.
pub struct HttpExportTarget<S: TokenSource> {
    client: Client,
    base_url: String,
    tokens: S,
    token: Mutex<String>,
}

impl<S: TokenSource> HttpExportTarget<S> {
    pub fn new(base_url: &str, tokens: S, timeout: Duration) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("geonet-stac/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CatalogError::Http(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| CatalogError::Http(err.to_string()))?;
        let token = tokens.token()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            token: Mutex::new(token),
        })
    }

    pub fn collection_url(&self, document: &ExportDocument) -> String {
        match (document.kind, document.parent.as_deref()) {
            (DocumentKind::Catalog, None) => format!("{}/catalogs/", self.base_url),
            (DocumentKind::Catalog, Some(parent)) => format!("{}/catalogs/{parent}/", self.base_url),
            (DocumentKind::Collection, _) => format!("{}/collections/", self.base_url),
            (DocumentKind::Item, Some(collection)) => {
                format!("{}/collections/{collection}/items/", self.base_url)
            }
            (DocumentKind::Item, None) => format!("{}/collections/items/", self.base_url),
        }
    }

    fn body(&self, document: &ExportDocument) -> Value {
        let mut body = document.body.clone();
        let url = self.collection_url(document);
        match document.kind {
            DocumentKind::Catalog if document.parent.is_none() => rewrite_links(&mut body, "root", &url),
            _ => rewrite_links(&mut body, "parent", &url),
        }
        body
    }

    fn bearer(&self) -> Result<String, CatalogError> {
        let token = self
            .token
            .lock()
            .map_err(|_| CatalogError::Http("token lock poisoned".to_string()))?;
        Ok(format!("Bearer {token}"))
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder, document: &ExportDocument) -> Result<u16, CatalogError> {
        let response = request
            .header(AUTHORIZATION, self.bearer()?)
            .json(&self.body(document))
            .send()
            .map_err(|err| CatalogError::Export {
                id: document.id.clone(),
                message: err.to_string(),
            })?;
        Ok(response.status().as_u16())
    }
}

impl<S: TokenSource> ExportTarget for HttpExportTarget<S> {
    fn create(&self, document: &ExportDocument) -> Result<u16, CatalogError> {
        let url = self.collection_url(document);
        self.send(self.client.post(url), document)
    }

    fn replace(&self, document: &ExportDocument) -> Result<u16, CatalogError> {
        let url = format!("{}{}", self.collection_url(document), document.id);
        self.send(self.client.put(url), document)
    }

    fn refresh_auth(&self) -> Result<(), CatalogError> {
        let fresh = self.tokens.token()?;
        let mut token = self
            .token
            .lock()
            .map_err(|_| CatalogError::Http("token lock poisoned".to_string()))?;
        *token = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use assert_matches::assert_matches;

    use super::*;
    use crate::report::RecordingSink;

    /// Replays scripted statuses and records every call.
    #[derive(Default)]
    struct ScriptedTarget {
        statuses: Mutex<VecDeque<u16>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTarget {
        fn with(statuses: &[u16]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                calls: Mutex::default(),
            }
        }

        fn next(&self, call: &str) -> Result<u16, CatalogError> {
            self.calls.lock().unwrap().push(call.to_string());
            Ok(self.statuses.lock().unwrap().pop_front().unwrap_or(500))
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ExportTarget for ScriptedTarget {
        fn create(&self, _document: &ExportDocument) -> Result<u16, CatalogError> {
            self.next("create")
        }

        fn replace(&self, _document: &ExportDocument) -> Result<u16, CatalogError> {
            self.next("replace")
        }

        fn refresh_auth(&self) -> Result<(), CatalogError> {
            self.calls.lock().unwrap().push("refresh".to_string());
            Ok(())
        }
    }

    fn document() -> ExportDocument {
        ExportDocument {
            kind: DocumentKind::Collection,
            id: "emodnet-physics".to_string(),
            parent: None,
            body: serde_json::json!({"id": "emodnet-physics", "links": []}),
        }
    }

    #[test]
    fn conflict_falls_back_to_replace() {
        let target = ScriptedTarget::with(&[409, 200]);
        let outcome = publish_document(&target, &document(), &RecordingSink::default());
        assert_eq!(outcome.action, PublishAction::Updated);
        assert_eq!(target.calls(), vec!["create", "replace"]);
    }

    #[test]
    fn expired_auth_is_refreshed_once() {
        let target = ScriptedTarget::with(&[401, 201]);
        let outcome = publish_document(&target, &document(), &RecordingSink::default());
        assert_eq!(outcome.action, PublishAction::Created);
        assert_eq!(target.calls(), vec!["create", "refresh", "create"]);

        let target = ScriptedTarget::with(&[401, 401, 401]);
        let outcome = publish_document(&target, &document(), &RecordingSink::default());
        assert_eq!(outcome.action, PublishAction::Failed);
        assert_eq!(outcome.status, Some(401));
        assert_eq!(target.calls(), vec!["create", "refresh", "create"]);
    }

    #[test]
    fn other_statuses_fail_without_retry() {
        let target = ScriptedTarget::with(&[500]);
        assert_matches!(
            try_publish(&target, &document()),
            Err(CatalogError::HttpStatus { status: 500, .. })
        );
        assert_eq!(target.calls(), vec!["create"]);
    }

    #[test]
    fn links_are_narrowed_to_one_relation() {
        let mut body = serde_json::json!({
            "links": [
                {"rel": "root", "href": "../catalog.json"},
                {"rel": "parent", "href": "../catalog.json"},
                {"rel": "child", "href": "./x/catalog.json"}
            ]
        });
        rewrite_links(&mut body, "parent", "https://api.example.org/data/collections/");
        assert_eq!(
            body["links"],
            serde_json::json!([{"rel": "parent", "href": "https://api.example.org/data/collections/"}])
        );
    }
}
