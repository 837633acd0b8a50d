//! Quick links
//!
//! Home page shortcuts, ordered by their numeric `order` and grouped by
//! category.

use crate::models::{QuickLink, Record, DEFAULT_LINK_ORDER, LINK_CLASS};
use crate::query::Query;
use crate::services::backend::{BackendError, ObjectBackend};
use std::sync::Arc;

/// Links sorted by numeric order, then title
pub fn sort_links(links: &mut [QuickLink]) {
    links.sort_by(|a, b| {
        a.order_key()
            .cmp(&b.order_key())
            .then_with(|| a.title.cmp(&b.title))
    });
}

/// Group sorted links by category: known categories in their fixed order,
/// then the others in order of first appearance.
pub fn group_by_category(links: &[QuickLink]) -> Vec<(String, Vec<QuickLink>)> {
    let mut groups: Vec<(String, Vec<QuickLink>)> = Vec::new();
    for link in links {
        match groups.iter_mut().find(|(category, _)| *category == link.category) {
            Some((_, members)) => members.push(link.clone()),
            None => groups.push((link.category.clone(), vec![link.clone()])),
        }
    }
    // Stable, so unknown categories keep their first-appearance order
    groups.sort_by_key(|(_, members)| members[0].category_rank());
    groups
}

pub struct LinkService {
    backend: Arc<dyn ObjectBackend>,
}

impl LinkService {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self { backend }
    }

    pub async fn list(&self) -> Result<Vec<QuickLink>, BackendError> {
        let mut links: Vec<QuickLink> = Query::of::<QuickLink>()
            .find_all_as(self.backend.as_ref(), crate::query::MAX_LIMIT)
            .await?;
        sort_links(&mut links);
        Ok(links)
    }

    /// Create the link, or update it when it carries an object id
    pub async fn save(&self, mut link: QuickLink) -> Result<QuickLink, BackendError> {
        link.title = link.title.trim().to_string();
        link.url = link.url.trim().to_string();
        link.order = link.order.trim().to_string();
        if link.title.is_empty() {
            return Err(BackendError::validation("Link title is required"));
        }
        if link.url.is_empty() {
            return Err(BackendError::validation("Link URL is required"));
        }
        if link.order.is_empty() {
            link.order = DEFAULT_LINK_ORDER.to_string();
        }

        let fields = link.to_fields()?;
        let doc = match link.object_id.as_deref() {
            Some(id) => self.backend.update(LINK_CLASS, id, fields).await?,
            None => self.backend.save(LINK_CLASS, fields).await?,
        };
        tracing::info!("Saved quick link {} ({})", link.title, doc.object_id);
        Ok(doc.decode()?)
    }

    pub async fn delete(&self, object_id: &str) -> Result<(), BackendError> {
        self.backend.delete(LINK_CLASS, object_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object::tests::setup_test_service;

    fn link(title: &str, category: &str, order: &str) -> QuickLink {
        QuickLink {
            title: title.into(),
            url: format!("https://{}.test", title),
            category: category.into(),
            order: order.into(),
            ..QuickLink::default()
        }
    }

    #[test]
    fn test_group_by_category_uses_fixed_order() {
        let mut links = vec![
            link("z", "自定义", "1"),
            link("b", "其他", "2"),
            link("a", "系统工具", "10"),
            link("c", "系统工具", "3"),
        ];
        sort_links(&mut links);
        let groups = group_by_category(&links);

        let names: Vec<&str> = groups.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, vec!["系统工具", "其他", "自定义"]);
        let tools: Vec<&str> = groups[0].1.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(tools, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_save_list_update_delete() {
        let (_dir, service) = setup_test_service().await;
        let links = LinkService::new(service.clone());

        let first = links.save(link("portal", "报关平台", "")).await.unwrap();
        links.save(link("tracker", "物流查询", "5")).await.unwrap();
        assert_eq!(first.order, "999");

        let listed = links.list().await.unwrap();
        assert_eq!(listed[0].title, "tracker");

        let mut edited = first.clone();
        edited.order = "1".into();
        links.save(edited).await.unwrap();
        assert_eq!(links.list().await.unwrap()[0].title, "portal");

        let id = first.object_id.clone().unwrap();
        links.delete(&id).await.unwrap();
        assert_eq!(links.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_requires_title_and_url() {
        let (_dir, service) = setup_test_service().await;
        let links = LinkService::new(service.clone());

        let no_url = QuickLink {
            title: "x".into(),
            ..QuickLink::default()
        };
        assert_eq!(links.save(no_url).await.unwrap_err().code(), "VALIDATION_ERROR");

        let no_title = QuickLink {
            title: " ".into(),
            url: "https://a.test".into(),
            ..QuickLink::default()
        };
        assert!(links.save(no_title).await.is_err());
    }
}
