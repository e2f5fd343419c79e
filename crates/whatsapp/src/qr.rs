use qrcode::{QrCode, render::unicode};

/// Render a pairing code as a terminal-printable block of half-height
/// characters. Returns `None` when the data does not fit a QR code.
pub fn render_qr(data: &str) -> Option<String> {
    let code = QrCode::new(data.as_bytes()).ok()?;
    Some(
        code.render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .quiet_zone(true)
            .build(),
    )
}
