use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use qrcode::{render::svg, QrCode};

/// Renders `text` as an SVG QR code and returns it as a data URL suitable
/// for an `<img src>`. Failure here is non-fatal for the auth flow; callers
/// fall back to a link-only response.
pub fn render_data_url(text: &str) -> Result<String> {
    let code = QrCode::new(text.as_bytes())?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(300, 300)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(image)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_svg_data_url() {
        let url = render_data_url("https://t.me/autor1z_bot?start=abc12345").unwrap();
        assert!(url.starts_with("data:image/svg+xml;base64,"));

        let payload = url.trim_start_matches("data:image/svg+xml;base64,");
        let decoded = STANDARD.decode(payload).unwrap();
        let svg = String::from_utf8(decoded).unwrap();
        assert!(svg.contains("<svg"));
    }
}
