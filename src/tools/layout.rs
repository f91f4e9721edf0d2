use crate::layouts::resolve_layout;
use crate::tools::{Tool, ToolContext};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Pure lookup against the fixed layout table; no I/O.
pub struct SelectComicLayout;

#[async_trait]
impl Tool for SelectComicLayout {
    fn name(&self) -> &'static str {
        "select_comic_layout"
    }

    fn description(&self) -> &'static str {
        "Select a page layout template for the comic by page count (1-5)"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn optional_params(&self) -> &'static [&'static str] {
        &["pageCount"]
    }

    async fn execute(&self, params: &Value, _ctx: &ToolContext) -> Result<Value> {
        let page_count = params
            .get("pageCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(3) as u32;
        let layout = resolve_layout(page_count);

        Ok(json!({
            "success": true,
            "pageCount": layout.page_count,
            "layoutName": layout.name,
            "panelsPerPage": layout.panels_per_page,
            "totalPanels": layout.total_panels(),
        }))
    }
}
