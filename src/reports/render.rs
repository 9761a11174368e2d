use async_trait::async_trait;
use std::fmt::Write as _;
use thiserror::Error;

use super::BapDocument;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render engine unavailable: {0}")]
    Unavailable(String),

    #[error("render failed: {0}")]
    Failed(String),
}

/// A rendered report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Turns an assembled BAP into a printable document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, document: &BapDocument) -> Result<RenderedDocument, RenderError>;
}

/// Renders the BAP as a self-contained HTML page (landscape A4 print layout).
#[derive(Debug, Clone, Default)]
pub struct HtmlReportRenderer;

impl HtmlReportRenderer {
    pub fn new() -> Self {
        Self
    }

    fn write_html(&self, doc: &BapDocument, out: &mut String) -> std::fmt::Result {
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html lang=\"id\"><head><meta charset=\"utf-8\">")?;
        writeln!(
            out,
            "<title>BAP Opname {}</title>",
            escape(&doc.location_name)
        )?;
        writeln!(
            out,
            "<style>@page {{ size: A4 landscape; margin: 12mm 10mm; }} \
             body {{ font-family: sans-serif; font-size: 11px; }} \
             table {{ border-collapse: collapse; width: 100%; margin-bottom: 16px; }} \
             th, td {{ border: 1px solid #444; padding: 3px 6px; text-align: left; }}</style>"
        )?;
        writeln!(out, "</head><body>")?;

        writeln!(out, "<h1>BERITA ACARA STOCK OPNAME</h1>")?;
        writeln!(
            out,
            "<p class=\"location\">{} &middot; {}</p>",
            escape(&doc.location_name.to_uppercase()),
            escape(&doc.location_group)
        )?;
        writeln!(
            out,
            "<p class=\"date\">Tanggal: {} Pukul: {}</p>",
            escape(&doc.end_date),
            escape(&doc.end_time)
        )?;

        writeln!(out, "<h2>Rekapitulasi</h2>")?;
        writeln!(
            out,
            "<table class=\"recap\"><thead><tr><th>No</th><th>Kategori</th><th>Jenis Produk</th>\
             <th>Qty Data</th><th>Qty Fisik</th><th>Selisih</th><th>Satuan</th></tr></thead><tbody>"
        )?;
        for (i, line) in doc.recap.iter().enumerate() {
            writeln!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                i + 1,
                escape(&line.category_label),
                escape(&line.product_variety),
                line.recorded_qty,
                line.physical_qty,
                escape(&line.variance),
                line.unit
            )?;
        }
        writeln!(out, "</tbody></table>")?;

        writeln!(out, "<h2>Tanda Tangan</h2><ul class=\"signatures\">")?;
        for signature in &doc.signatures {
            writeln!(
                out,
                "<li><strong>{}</strong>: {} ({})</li>",
                escape(signature.label),
                escape(&signature.name),
                escape(&signature.signed_at)
            )?;
        }
        writeln!(out, "</ul>")?;

        writeln!(out, "<h2>Lampiran ({} aset)</h2>", doc.details.len())?;
        writeln!(
            out,
            "<table class=\"details\"><thead><tr><th>No</th><th>Kategori</th><th>Perusahaan</th>\
             <th>Asset Tag</th><th>Nama Aset</th><th>Kelengkapan</th><th>Pengguna</th>\
             <th>Status</th><th>Cost Center</th><th>Catatan Tindakan</th></tr></thead><tbody>"
        )?;
        for (i, row) in doc.details.iter().enumerate() {
            writeln!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td>\
                 <td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                i + 1,
                escape(super::category_label(&row.category)),
                escape(&row.company),
                escape(&row.asset_tag),
                escape(&row.asset_name),
                escape(row.equipments.as_deref().unwrap_or("-")),
                escape(&row.user_name_and_position),
                escape(&row.asset_status),
                row.cost_center_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                escape(row.action_notes.as_deref().unwrap_or("-"))
            )?;
        }
        writeln!(out, "</tbody></table>")?;
        writeln!(out, "</body></html>")
    }
}

#[async_trait]
impl DocumentRenderer for HtmlReportRenderer {
    async fn render(&self, document: &BapDocument) -> Result<RenderedDocument, RenderError> {
        let mut html = String::with_capacity(4096 + document.details.len() * 256);
        self.write_html(document, &mut html)
            .map_err(|e| RenderError::Failed(e.to_string()))?;
        Ok(RenderedDocument {
            bytes: html.into_bytes(),
            content_type: "text/html; charset=utf-8",
            extension: "html",
        })
    }
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DetailRow, RecapRow};
    use crate::reports::{RecapLine, Signature, SUBMITTER_LABEL};

    fn document() -> BapDocument {
        BapDocument {
            session_id: 3,
            location_name: "Plant <A>".into(),
            location_group: "Jawa Barat".into(),
            end_date: "2024-03-01".into(),
            end_time: "09:00".into(),
            recap: vec![RecapLine::from(&RecapRow {
                category: "missing_assets".into(),
                product_variety: "Laptop".into(),
                asset_count: 2,
            })],
            details: vec![DetailRow {
                category: "broken_assets".into(),
                company: "PT Maju".into(),
                asset_tag: "AT-001".into(),
                asset_name: "Laptop".into(),
                equipments: None,
                user_name_and_position: "Sari - Staff".into(),
                asset_status: "broken".into(),
                action_notes: Some("send to repair".into()),
                cost_center_id: Some(1201),
            }],
            signatures: vec![Signature {
                label: SUBMITTER_LABEL,
                name: "Sari".into(),
                signed_at: "2024-03-01 09:00 WIB".into(),
            }],
        }
    }

    #[tokio::test]
    async fn html_contains_tables_and_signatures() {
        let rendered = HtmlReportRenderer::new().render(&document()).await.unwrap();
        assert_eq!(rendered.extension, "html");
        let html = String::from_utf8(rendered.bytes).unwrap();

        assert!(html.contains("Plant &lt;A&gt;"));
        assert!(!html.contains("Plant <A>"));
        assert!(html.contains("tidak ditemukan"));
        assert!(html.contains("<td>2</td><td>0</td><td>2</td><td>Unit</td>"));
        assert!(html.contains("AT-001"));
        assert!(html.contains("rusak"));
        assert!(html.contains("send to repair"));
        assert!(html.contains("Dilaksanakan oleh"));
        assert!(html.contains("Lampiran (1 aset)"));
    }

    #[test]
    fn escape_handles_markup() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
