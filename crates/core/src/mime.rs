//! Content-type derivation for generated artifacts.

/// Fallback for extensions outside the table.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Map a filename to its MIME type by extension (case-insensitive).
///
/// # Examples
///
/// ```
/// use genforge_core::mime::content_type_for;
///
/// assert_eq!(content_type_for("ComfyUI_00001_.png"), "image/png");
/// assert_eq!(content_type_for("clip.MP4"), "video/mp4");
/// assert_eq!(content_type_for("weights.safetensors"), "application/octet-stream");
/// ```
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return OCTET_STREAM,
    };

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        _ => OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_lowercase() {
        assert_eq!(content_type_for("x.png"), "image/png");
    }

    #[test]
    fn png_uppercase() {
        assert_eq!(content_type_for("X.PNG"), "image/png");
    }

    #[test]
    fn jpeg_both_spellings() {
        assert_eq!(content_type_for("a.jpg"), "image/jpeg");
        assert_eq!(content_type_for("a.JPEG"), "image/jpeg");
    }

    #[test]
    fn gif_webp_mp4() {
        assert_eq!(content_type_for("anim.gif"), "image/gif");
        assert_eq!(content_type_for("still.webp"), "image/webp");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
    }

    #[test]
    fn unknown_extension_falls_back() {
        assert_eq!(content_type_for("x.unknownext"), OCTET_STREAM);
    }

    #[test]
    fn no_extension_falls_back() {
        assert_eq!(content_type_for("README"), OCTET_STREAM);
    }

    #[test]
    fn only_last_extension_counts() {
        assert_eq!(content_type_for("frame.png.tmp"), OCTET_STREAM);
        assert_eq!(content_type_for("archive.tar.gif"), "image/gif");
    }
}
