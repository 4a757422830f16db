use async_trait::async_trait;
use qrcode::{render::svg, EcLevel, QrCode};

use crate::error::PixError;

/// Turns a finished payload into a scannable image.
///
/// Implementations only read the payload. A failure leaves the payload valid
/// and is reported as `PixError::RenderingUnavailable`.
#[async_trait]
pub trait QrRenderer: Send + Sync {
    async fn render(&self, payload: &str) -> Result<String, PixError>;
}

/// Renders an SVG document in-process.
#[derive(Debug, Clone)]
pub struct SvgQrRenderer {
    min_dimension: u32,
}

impl SvgQrRenderer {
    pub fn new(min_dimension: u32) -> Self {
        Self { min_dimension }
    }
}

impl Default for SvgQrRenderer {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl QrRenderer for SvgQrRenderer {
    async fn render(&self, payload: &str) -> Result<String, PixError> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
            .map_err(|e| PixError::RenderingUnavailable(e.to_string()))?;

        Ok(code
            .render::<svg::Color<'_>>()
            .min_dimensions(self.min_dimension, self.min_dimension)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_svg_renderer_produces_svg() {
        let svg = SvgQrRenderer::default()
            .render("00020126330014BR.GOV.BCB.PIX011112345678900520400005303986540513.505802BR5915PDV Inteligente6009SAO PAULO62210517TXID17000000000006304F239")
            .await
            .unwrap();

        assert!(svg.contains("<svg"));
    }

    #[tokio::test]
    async fn test_svg_renderer_reports_oversized_input() {
        let too_long = "9".repeat(8000);
        let err = SvgQrRenderer::default().render(&too_long).await.unwrap_err();

        assert!(matches!(err, PixError::RenderingUnavailable(_)));
    }
}
