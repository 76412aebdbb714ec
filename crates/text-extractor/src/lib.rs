use lake_types::{Error, ExtractionMethod, Result};

/// A page counts as having a usable embedded text layer once it clears this many
/// non-whitespace characters; below that it's noise (a stray header/footer stamp) rather
/// than real text.
const MIN_CHARS_PER_PAGE: usize = 40;

/// Confidence assigned to a page whose embedded text cleared [`MIN_CHARS_PER_PAGE`].
const EMBEDDED_CONFIDENCE: f32 = 0.95;
/// Confidence assigned to a page whose embedded text layer exists but is too sparse to
/// trust, and that ends up not being OCR'd anyway (the document's overall ratio was still
/// acceptable).
const WEAK_EMBEDDED_CONFIDENCE: f32 = 0.3;
/// Confidence assigned to a page whose text came from [`ocr_pages`].
const OCR_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub confidence: f32,
    pub method: ExtractionMethod,
    pub page_confidences: Vec<f32>,
}

struct EmbeddedPage {
    page_number: u32,
    text: String,
    usable: bool,
}

struct FinalPage {
    text: String,
    confidence: f32,
    used_ocr: bool,
}

/// Reads the embedded text layer out of a PDF's content streams, page by page. Each page
/// is marked `usable` once its non-whitespace character count clears [`MIN_CHARS_PER_PAGE`]
/// — the heuristic for "this page actually has a text layer" as opposed to a stray stamp.
fn extract_embedded_pages(doc_id: &str, pdf_bytes: &[u8]) -> Result<Vec<EmbeddedPage>> {
    let doc = lopdf::Document::load_mem(pdf_bytes).map_err(|e| Error::ExtractionFailed {
        doc_id: doc_id.to_string(),
        reason: format!("failed to parse PDF structure: {e}"),
    })?;

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(Error::ExtractionFailed { doc_id: doc_id.to_string(), reason: "PDF has no pages".to_string() });
    }

    let mut pages = Vec::with_capacity(page_numbers.len());
    for page_number in page_numbers {
        let text = match doc.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(doc_id, page_number, error = %e, "page has no extractable content stream");
                String::new()
            }
        };
        let usable = text.chars().filter(|c| !c.is_whitespace()).count() >= MIN_CHARS_PER_PAGE;
        pages.push(EmbeddedPage { page_number, text, usable });
    }
    Ok(pages)
}

/// Extracts text from `pdf_bytes`. Every page is first read from the embedded text layer;
/// if the fraction of pages clearing [`MIN_CHARS_PER_PAGE`] falls below `ocr_fallback_ratio`,
/// the pages that didn't clear it are individually rasterized and OCR'd, while pages that
/// already had usable text keep it (§4.5). The result's `method` reflects what actually
/// happened: `embedded` if no page needed OCR, `ocr` if every page did, `mixed` otherwise.
/// Overall `confidence` is the per-page confidences averaged with weights proportional to
/// each page's character count.
pub async fn extract_text(doc_id: &str, pdf_bytes: &[u8], ocr_fallback_ratio: f32) -> Result<ExtractedText> {
    let embedded_pages = extract_embedded_pages(doc_id, pdf_bytes)?;
    let usable_count = embedded_pages.iter().filter(|p| p.usable).count();
    let ratio = usable_count as f32 / embedded_pages.len() as f32;

    let mut final_pages: Vec<FinalPage> = embedded_pages
        .iter()
        .map(|p| FinalPage {
            text: p.text.clone(),
            confidence: if p.usable { EMBEDDED_CONFIDENCE } else { WEAK_EMBEDDED_CONFIDENCE },
            used_ocr: false,
        })
        .collect();

    if ratio < ocr_fallback_ratio {
        let ocr_targets: Vec<u32> = embedded_pages.iter().filter(|p| !p.usable).map(|p| p.page_number).collect();
        let ocr_texts = ocr_pages(doc_id, pdf_bytes, &ocr_targets).await?;
        for (page_number, text) in ocr_targets.into_iter().zip(ocr_texts) {
            let idx = embedded_pages
                .iter()
                .position(|p| p.page_number == page_number)
                .expect("page_number came from embedded_pages");
            final_pages[idx] = FinalPage { text, confidence: OCR_CONFIDENCE, used_ocr: true };
        }
    }

    Ok(combine(final_pages))
}

fn combine(pages: Vec<FinalPage>) -> ExtractedText {
    let any_ocr = pages.iter().any(|p| p.used_ocr);
    let all_ocr = pages.iter().all(|p| p.used_ocr);
    let method = if !any_ocr {
        ExtractionMethod::Embedded
    } else if all_ocr {
        ExtractionMethod::Ocr
    } else {
        ExtractionMethod::Mixed
    };

    let mut text = String::new();
    let mut weighted_sum = 0.0f64;
    let mut total_chars = 0usize;
    let page_confidences: Vec<f32> = pages.iter().map(|p| p.confidence).collect();
    for page in &pages {
        let chars = page.text.chars().count();
        weighted_sum += page.confidence as f64 * chars as f64;
        total_chars += chars;
        text.push_str(&page.text);
        text.push('\n');
    }
    let confidence = if total_chars == 0 { 0.0 } else { (weighted_sum / total_chars as f64) as f32 };

    ExtractedText { text, confidence, method, page_confidences }
}

/// Rasterizes `page_numbers` out of `pdf_bytes` with `pdftoppm` and OCRs each one, in page
/// order. Pages are rendered individually rather than the whole document up front, so a
/// mostly-embedded PDF only pays for rendering the handful of pages it actually needs OCR'd.
async fn ocr_pages(doc_id: &str, pdf_bytes: &[u8], page_numbers: &[u32]) -> Result<Vec<String>> {
    if page_numbers.is_empty() {
        return Ok(Vec::new());
    }

    let doc_id = doc_id.to_string();
    let pdf_bytes = pdf_bytes.to_vec();
    let page_numbers = page_numbers.to_vec();
    tokio::task::spawn_blocking(move || ocr_pages_blocking(&doc_id, &pdf_bytes, &page_numbers))
        .await
        .map_err(|e| Error::Internal(e.into()))?
}

fn ocr_pages_blocking(doc_id: &str, pdf_bytes: &[u8], page_numbers: &[u32]) -> Result<Vec<String>> {
    let workdir = tempfile::TempDir::new().map_err(|e| Error::Internal(e.into()))?;
    let pdf_path = workdir.path().join("source.pdf");
    std::fs::write(&pdf_path, pdf_bytes).map_err(|e| Error::Internal(e.into()))?;

    let args = rusty_tesseract::Args { lang: "eng".to_string(), ..Default::default() };
    let mut results = Vec::with_capacity(page_numbers.len());
    for &page_number in page_numbers {
        let image_path = rasterize_page(doc_id, &pdf_path, workdir.path(), page_number)?;
        let image = rusty_tesseract::Image::from_path(&image_path).map_err(|e| Error::ExtractionFailed {
            doc_id: doc_id.to_string(),
            reason: format!("failed to load rasterized page {page_number}: {e}"),
        })?;
        let text = rusty_tesseract::image_to_string(&image, &args).map_err(|e| Error::ExtractionFailed {
            doc_id: doc_id.to_string(),
            reason: format!("tesseract failed on page {page_number}: {e}"),
        })?;
        results.push(text);
    }
    Ok(results)
}

/// Shells out to poppler's `pdftoppm` to render a single page to a PNG, the same way this
/// crate already shells out to `tesseract` via `rusty-tesseract` for the OCR half.
fn rasterize_page(
    doc_id: &str,
    pdf_path: &std::path::Path,
    out_dir: &std::path::Path,
    page_number: u32,
) -> Result<std::path::PathBuf> {
    let prefix = out_dir.join(format!("page-{page_number}"));
    let status = std::process::Command::new("pdftoppm")
        .args(["-png", "-r", "200", "-f", &page_number.to_string(), "-l", &page_number.to_string()])
        .arg(pdf_path)
        .arg(&prefix)
        .status()
        .map_err(|e| Error::ExtractionFailed {
            doc_id: doc_id.to_string(),
            reason: format!("failed to invoke pdftoppm for page {page_number}: {e}"),
        })?;
    if !status.success() {
        return Err(Error::ExtractionFailed {
            doc_id: doc_id.to_string(),
            reason: format!("pdftoppm exited with {status} rasterizing page {page_number}"),
        });
    }

    // pdftoppm appends its own page-number suffix to the prefix even when -f/-l pin a
    // single page, so the produced filename isn't known up front.
    std::fs::read_dir(out_dir)
        .map_err(|e| Error::Internal(e.into()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.file_stem().and_then(|s| s.to_str()).is_some_and(|s| s.starts_with(&format!("page-{page_number}-")))
                && p.extension().is_some_and(|ext| ext == "png")
        })
        .ok_or_else(|| Error::ExtractionFailed {
            doc_id: doc_id.to_string(),
            reason: format!("pdftoppm did not produce an image for page {page_number}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pdf_bytes_fail_with_extraction_failed() {
        let err = extract_embedded_pages("doc-1", b"not a pdf").unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn ocr_with_no_target_pages_returns_empty_without_invoking_tesseract() {
        let texts = ocr_pages("doc-1", b"irrelevant", &[]).await.unwrap();
        assert!(texts.is_empty());
    }

    #[test]
    fn combine_reports_embedded_when_no_page_used_ocr() {
        let pages = vec![FinalPage { text: "hello world".to_string(), confidence: EMBEDDED_CONFIDENCE, used_ocr: false }];
        let result = combine(pages);
        assert_eq!(result.method, ExtractionMethod::Embedded);
        assert!((result.confidence - EMBEDDED_CONFIDENCE).abs() < f32::EPSILON);
        assert_eq!(result.page_confidences, vec![EMBEDDED_CONFIDENCE]);
    }

    #[test]
    fn combine_reports_mixed_when_only_some_pages_used_ocr() {
        let pages = vec![
            FinalPage { text: "a".repeat(100), confidence: EMBEDDED_CONFIDENCE, used_ocr: false },
            FinalPage { text: "b".repeat(100), confidence: OCR_CONFIDENCE, used_ocr: true },
        ];
        let result = combine(pages);
        assert_eq!(result.method, ExtractionMethod::Mixed);
        assert!((result.confidence - (EMBEDDED_CONFIDENCE + OCR_CONFIDENCE) / 2.0).abs() < 0.01);
    }

    #[test]
    fn combine_reports_ocr_when_every_page_used_ocr() {
        let pages = vec![FinalPage { text: "scanned".to_string(), confidence: OCR_CONFIDENCE, used_ocr: true }];
        let result = combine(pages);
        assert_eq!(result.method, ExtractionMethod::Ocr);
    }
}
