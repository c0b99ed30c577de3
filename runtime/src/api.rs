//! [`EngagementApi`] and [`CategoryApi`] over HTTP.
//!
//! Every call goes through [`RequestTransport`], so anti-forgery tokens,
//! trace spans and the token retry apply. Payloads are mapped with the
//! functions in [`agora_core::wire`].

use crate::categories::CategoryApi;
use crate::engagement::EngagementApi;
use agora_core::wire::{
    self, WireCategory, WireCategoryCreate, WireCategoryList, WireCategoryRename,
    WireEngagementRecord, WirePage,
};
use agora_core::{
    Category, CategoryId, Cursor, EngagementFilter, EngagementKind, EngagementPatch,
    EngagementRecord, Page, PostId,
};
use agora_transport::{RequestOptions, RequestTransport, Result};
use serde::de::IgnoredAny;

const CATEGORIES_PATH: &str = "/me/categories";

fn engagement_path(kind: EngagementKind, post: &PostId) -> String {
    format!("/posts/{post}/{}", kind.path_segment())
}

fn category_path(id: &CategoryId) -> String {
    format!("{CATEGORIES_PATH}/{id}")
}

impl EngagementApi for RequestTransport {
    async fn upsert(
        &self,
        kind: EngagementKind,
        post: &PostId,
        patch: &EngagementPatch,
    ) -> Result<EngagementRecord> {
        let body = wire::patch_to_wire(patch);
        let record: WireEngagementRecord = self.put(&engagement_path(kind, post), &body).await?;
        Ok(wire::record_from_wire(record, kind)?)
    }

    async fn remove(&self, kind: EngagementKind, post: &PostId) -> Result<()> {
        let _: IgnoredAny = RequestTransport::delete(self, &engagement_path(kind, post)).await?;
        Ok(())
    }

    async fn list_mine(
        &self,
        kind: EngagementKind,
        filter: &EngagementFilter,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> Result<Page<EngagementRecord>> {
        let mut options = RequestOptions::new()
            .queries(wire::filter_to_query(filter))
            .query("limit", limit.to_string());
        if let Some(cursor) = cursor {
            options = options.query("cursor", cursor.as_str());
        }

        let page: WirePage<WireEngagementRecord> =
            self.get(&format!("/me/{}", kind.path_segment()), &options).await?;
        Ok(wire::page_from_wire(page, |record| wire::record_from_wire(record, kind))?)
    }
}

impl CategoryApi for RequestTransport {
    async fn list(&self, kind: EngagementKind) -> Result<Vec<Category>> {
        let options = RequestOptions::new().query("kind", kind.wire_name());
        let list: WireCategoryList = self.get(CATEGORIES_PATH, &options).await?;
        Ok(wire::categories_from_wire(list)?)
    }

    async fn create(&self, kind: EngagementKind, name: &str) -> Result<Category> {
        let body = WireCategoryCreate {
            name: name.to_string(),
            kind: kind.wire_name(),
        };
        let created: WireCategory = self.post(CATEGORIES_PATH, &body).await?;
        Ok(wire::category_from_wire(created)?)
    }

    async fn rename(&self, id: &CategoryId, name: &str) -> Result<Category> {
        let body = WireCategoryRename {
            name: name.to_string(),
        };
        let renamed: WireCategory = self.patch(&category_path(id), &body).await?;
        Ok(wire::category_from_wire(renamed)?)
    }

    async fn delete(&self, id: &CategoryId) -> Result<()> {
        let _: IgnoredAny = RequestTransport::delete(self, &category_path(id)).await?;
        Ok(())
    }

    async fn reorder(&self, kind: EngagementKind, ids: &[CategoryId]) -> Result<()> {
        let body = wire::order_to_wire(kind, ids);
        let _: IgnoredAny = self.put(&format!("{CATEGORIES_PATH}/order"), &body).await?;
        Ok(())
    }
}
