//! QR code rendering for pairing.
//!
//! Two renderings of the same payload: an SVG data URL pushed to browsers
//! over the real-time channel, and a Unicode half-block rendering for the
//! server log so headless operators can pair from a terminal.

use base64::Engine;
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};

/// Render the pairing payload as an SVG data URL suitable for an `<img src>`.
pub fn render_qr_data_url(data: &str) -> Option<String> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L).ok()?;
    let image = code
        .render()
        .min_dimensions(240, 240)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    let encoded = base64::engine::general_purpose::STANDARD.encode(image.as_bytes());
    Some(format!("data:image/svg+xml;base64,{}", encoded))
}

/// Render the pairing payload with Unicode half blocks, two module rows per
/// text line, with the 4-module quiet zone scanners require.
pub fn render_qr_terminal(data: &str) -> Option<String> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L).ok()?;
    let matrix = code.to_colors();
    let w = code.width();
    let quiet = 4;
    let total = w + quiet * 2;
    let mut out = String::new();

    let color_at = |x: usize, y: usize| -> qrcode::Color {
        if x < quiet || x >= quiet + w || y < quiet || y >= quiet + w {
            qrcode::Color::Light
        } else {
            matrix[(y - quiet) * w + (x - quiet)]
        }
    };

    let mut y = 0;
    while y < total {
        for x in 0..total {
            let top = color_at(x, y);
            let bottom = if y + 1 < total {
                color_at(x, y + 1)
            } else {
                qrcode::Color::Light
            };
            out.push(match (top, bottom) {
                (qrcode::Color::Light, qrcode::Color::Light) => ' ',
                (qrcode::Color::Dark, qrcode::Color::Dark) => '\u{2588}',
                (qrcode::Color::Dark, qrcode::Color::Light) => '\u{2580}',
                (qrcode::Color::Light, qrcode::Color::Dark) => '\u{2584}',
            });
        }
        out.push('\n');
        y += 2;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_shape() {
        let url = render_qr_data_url("2@abcdef,pairing,payload").unwrap();
        assert!(url.starts_with("data:image/svg+xml;base64,"));
        // The base64 payload decodes back to SVG markup.
        let b64 = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        let svg_text = String::from_utf8(bytes).unwrap();
        assert!(svg_text.contains("<svg"));
    }

    #[test]
    fn test_terminal_rendering_nonempty() {
        let art = render_qr_terminal("test-data").unwrap();
        assert!(!art.is_empty());
        // Every line has the same width (square code + quiet zone).
        let widths: Vec<usize> = art.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_terminal_rendering_has_quiet_zone() {
        let art = render_qr_terminal("quiet-zone").unwrap();
        let first_line = art.lines().next().unwrap();
        // The quiet zone makes the first columns blank.
        assert!(first_line.starts_with("    "));
    }
}
