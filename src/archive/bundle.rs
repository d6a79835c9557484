use std::collections::HashMap;
use std::rc::Rc;

use url::Url;

use crate::utils::ids::IdSource;
use crate::utils::url::normalize_url;

/// Index of a resource inside its bundle. Index 0 is the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub usize);

impl ResourceId {
    pub const ROOT: ResourceId = ResourceId(0);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceStatus {
    Pending,
    Saved,
    Failed { status: Option<u16> },
}

#[derive(Clone, Debug)]
pub struct Resource {
    pub id: ResourceId,
    /// Identity: the fragment-less URI, or a synthetic `urn:snapshot-` URI
    /// for modified copies.
    pub uri: String,
    pub original_url: Url,
    /// Where the content actually came from, after redirects.
    pub final_url: Option<Url>,
    pub modified: bool,
    pub media_type: String,
    pub charset: Option<String>,
    pub data: Vec<u8>,
    /// Path relative to the output root, `/`-separated.
    pub local_name: Option<String>,
    pub content_location: Option<String>,
    pub content_id: Option<String>,
    pub status: ResourceStatus,
}

impl Resource {
    pub fn is_saved(&self) -> bool {
        self.status == ResourceStatus::Saved
    }

    /// True when `url` (fragment ignored) names this resource, either by
    /// the address it was requested from or the one it was served from.
    pub fn is_located_at(&self, url: &Url) -> bool {
        let key = normalize_url(url);
        key == normalize_url(&self.original_url)
            || self.final_url.as_ref().map(normalize_url).as_deref() == Some(key.as_str())
    }
}

/// Registry of every resource in a snapshot.
pub struct ResourceBundle {
    resources: Vec<Resource>,
    by_reference_uri: HashMap<String, ResourceId>,
    by_original_uri: HashMap<String, ResourceId>,
    ids: Rc<dyn IdSource>,
}

impl ResourceBundle {
    pub fn new(ids: Rc<dyn IdSource>) -> Self {
        Self {
            resources: Vec::new(),
            by_reference_uri: HashMap::new(),
            by_original_uri: HashMap::new(),
            ids,
        }
    }

    /// Returns the resource for `url`, creating it when needed. The flag in
    /// the result tells whether a new resource was created.
    ///
    /// Unmodified requests are deduplicated by reference URI. Modified
    /// requests look up the original URI; if a resource already exists
    /// there, a distinct copy with a fresh synthetic URI is created.
    pub fn get_or_create(&mut self, url: &Url, modified: bool) -> (ResourceId, bool) {
        let key = normalize_url(url);

        if !modified {
            if let Some(id) = self.by_reference_uri.get(&key) {
                return (*id, false);
            }
            return (self.insert(key.clone(), url, false), true);
        }

        if !self.by_original_uri.contains_key(&key) && !self.by_reference_uri.contains_key(&key) {
            return (self.insert(key.clone(), url, true), true);
        }

        let synthetic = loop {
            let candidate = format!("urn:snapshot-{}:{}", self.ids.next_token(), key);
            if !self.by_reference_uri.contains_key(&candidate) {
                break candidate;
            }
        };
        (self.insert(synthetic, url, true), true)
    }

    fn insert(&mut self, uri: String, url: &Url, modified: bool) -> ResourceId {
        let id = ResourceId(self.resources.len());
        let mut original_url = url.clone();
        original_url.set_fragment(None);

        self.by_reference_uri.insert(uri.clone(), id);
        self.by_original_uri
            .entry(normalize_url(url))
            .or_insert(id);
        self.resources.push(Resource {
            id,
            uri,
            original_url,
            final_url: None,
            modified,
            media_type: String::new(),
            charset: None,
            data: Vec::new(),
            local_name: None,
            content_location: None,
            content_id: None,
            status: ResourceStatus::Pending,
        });

        id
    }

    /// Looks up an unmodified resource by URI (fragment ignored).
    pub fn find(&self, url: &Url) -> Option<ResourceId> {
        self.by_reference_uri.get(&normalize_url(url)).copied()
    }

    /// Looks up the first resource registered for an original URI.
    pub fn find_by_original(&self, url: &Url) -> Option<ResourceId> {
        self.by_original_uri.get(&normalize_url(url)).copied()
    }

    /// Makes `url` an additional name for an existing resource (after a redirect).
    pub fn add_alias(&mut self, id: ResourceId, url: &Url) {
        self.by_reference_uri.entry(normalize_url(url)).or_insert(id);
    }

    pub fn get(&self, id: ResourceId) -> &Resource {
        &self.resources[id.0]
    }

    pub fn get_mut(&mut self, id: ResourceId) -> &mut Resource {
        &mut self.resources[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ids::SequentialIds;

    fn bundle() -> ResourceBundle {
        ResourceBundle::new(Rc::new(SequentialIds::new()))
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn deduplicates_by_normalized_uri() {
        let mut bundle = bundle();
        let (a, created_a) = bundle.get_or_create(&url("https://a.example/x.png#one"), false);
        let (b, created_b) = bundle.get_or_create(&url("https://a.example/x.png#two"), false);

        assert_eq!(a, b);
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.get(a).uri, "https://a.example/x.png");
    }

    #[test]
    fn first_modified_request_keeps_the_plain_uri() {
        let mut bundle = bundle();
        let (id, _) = bundle.get_or_create(&url("https://a.example/s.css"), true);
        assert_eq!(bundle.get(id).uri, "https://a.example/s.css");
        assert!(bundle.get(id).modified);
    }

    #[test]
    fn modified_copies_get_distinct_synthetic_uris() {
        let mut bundle = bundle();
        let page = url("https://a.example/page.html");
        let (original, _) = bundle.get_or_create(&page, false);
        let (copy_a, _) = bundle.get_or_create(&page, true);
        let (copy_b, _) = bundle.get_or_create(&page, true);

        assert_ne!(original, copy_a);
        assert_ne!(copy_a, copy_b);
        assert_eq!(bundle.get(copy_a).uri, "urn:snapshot-00000001:https://a.example/page.html");
        assert_eq!(bundle.get(copy_b).uri, "urn:snapshot-00000002:https://a.example/page.html");
        assert_eq!(bundle.get(copy_b).original_url, page);

        // Plain lookups still converge on the unmodified resource
        assert_eq!(bundle.get_or_create(&page, false), (original, false));
        assert_eq!(bundle.find_by_original(&page), Some(original));
    }

    #[test]
    fn synthetic_uris_never_collide() {
        struct Constant;
        impl IdSource for Constant {
            fn next_token(&self) -> String {
                "deadbeef".to_string()
            }
        }
        struct Cycle(std::cell::Cell<usize>);
        impl IdSource for Cycle {
            fn next_token(&self) -> String {
                let n = self.0.get();
                self.0.set(n + 1);
                // Repeats the first token once before moving on
                if n < 2 { "aaaaaaaa".to_string() } else { format!("{:08x}", n) }
            }
        }

        let mut bundle = ResourceBundle::new(Rc::new(Cycle(std::cell::Cell::new(0))));
        let page = url("https://a.example/");
        bundle.get_or_create(&page, false);
        let (a, _) = bundle.get_or_create(&page, true);
        let (b, _) = bundle.get_or_create(&page, true);
        assert_ne!(bundle.get(a).uri, bundle.get(b).uri);
        assert_eq!(bundle.get(b).uri, "urn:snapshot-00000002:https://a.example/");

        let mut bundle = ResourceBundle::new(Rc::new(Constant));
        bundle.get_or_create(&page, false);
        let (c, _) = bundle.get_or_create(&page, true);
        assert!(bundle.get(c).uri.starts_with("urn:snapshot-deadbeef:"));
    }

    #[test]
    fn aliases_resolve_redirected_urls() {
        let mut bundle = bundle();
        let (id, _) = bundle.get_or_create(&url("http://a.example/"), false);
        bundle.add_alias(id, &url("https://a.example/"));
        bundle.get_mut(id).final_url = Some(url("https://a.example/"));

        assert_eq!(bundle.find(&url("https://a.example/#top")), Some(id));
        assert!(bundle.get(id).is_located_at(&url("https://a.example/")));
    }
}
