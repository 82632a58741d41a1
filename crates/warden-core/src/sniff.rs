//! Content type detection from magic bytes.
//!
//! Only the raw bytes count; a server's `Content-Type` header is never
//! trusted here.

/// Fallback for unrecognized binary content.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Detects the content type of a body from its first bytes.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if let Some(mime) = detect_binary(data) {
        return mime;
    }
    if let Some(mime) = detect_text(data) {
        return mime;
    }
    OCTET_STREAM
}

/// Offset of the `e_lfanew` field in the DOS header.
const E_LFANEW: usize = 0x3C;

/// Largest `e_lfanew` accepted when the PE header lies past the chunk.
const MAX_E_LFANEW: usize = 0x1_0000;

/// Checks for `PE\0\0` where the DOS header points. A chunk too short to
/// hold the header keeps the bare `MZ` verdict, as does a plausible offset
/// past the end of the chunk.
fn has_pe_signature(data: &[u8]) -> bool {
    let Some(field) = data.get(E_LFANEW..E_LFANEW + 4) else {
        return true;
    };
    let offset = u32::from_le_bytes([field[0], field[1], field[2], field[3]]) as usize;
    if offset < E_LFANEW + 4 {
        return false;
    }
    match data.get(offset..offset + 4) {
        Some(signature) => signature == b"PE\0\0",
        None => offset <= MAX_E_LFANEW,
    }
}

fn detect_binary(data: &[u8]) -> Option<&'static str> {
    if data.len() < 2 {
        return None;
    }

    // Windows PE: MZ, then PE\0\0 at e_lfanew when the chunk reaches it
    if data.starts_with(b"MZ") && has_pe_signature(data) {
        return Some("application/x-msdownload");
    }

    // ELF
    if data.starts_with(&[0x7F, b'E', b'L', b'F']) {
        return Some("application/x-executable");
    }

    // Mach-O, both endiannesses, 32 and 64 bit
    if data.starts_with(&[0xFE, 0xED, 0xFA, 0xCE])
        || data.starts_with(&[0xFE, 0xED, 0xFA, 0xCF])
        || data.starts_with(&[0xCE, 0xFA, 0xED, 0xFE])
        || data.starts_with(&[0xCF, 0xFA, 0xED, 0xFE])
    {
        return Some("application/x-mach-binary");
    }

    // CA FE BA BE is shared by Java classes and universal Mach-O binaries.
    // Universal binaries store a small architecture count where classes
    // store their version (45 and up).
    if data.len() >= 8 && data.starts_with(&[0xCA, 0xFE, 0xBA, 0xBE]) {
        let second_word = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        return Some(if second_word < 45 {
            "application/x-mach-binary"
        } else {
            "application/java-vm"
        });
    }

    // ZIP and ZIP-based containers
    if data.starts_with(b"PK\x03\x04") || data.starts_with(b"PK\x05\x06") {
        return Some(detect_zip_flavor(data));
    }

    if data.starts_with(b"%PDF-") {
        return Some("application/pdf");
    }

    // gzip: 1F 8B
    if data.starts_with(&[0x1F, 0x8B]) {
        return Some("application/gzip");
    }

    if data.starts_with(b"BZh") {
        return Some("application/x-bzip2");
    }

    // xz: FD 37 7A 58 5A 00
    if data.starts_with(&[0xFD, b'7', b'z', b'X', b'Z', 0x00]) {
        return Some("application/x-xz");
    }

    // 7z: 37 7A BC AF 27 1C
    if data.starts_with(&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C]) {
        return Some("application/x-7z-compressed");
    }

    if data.starts_with(b"Rar!\x1A\x07") {
        return Some("application/vnd.rar");
    }

    // OLE compound file (MSI, legacy Office)
    if data.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]) {
        return Some("application/x-ole-storage");
    }

    if data.starts_with(b"\0asm") {
        return Some("application/wasm");
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }

    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }

    // RIFF containers: WebP and WAV
    if data.len() >= 12 && data.starts_with(b"RIFF") {
        match &data[8..12] {
            b"WEBP" => return Some("image/webp"),
            b"WAVE" => return Some("audio/wav"),
            _ => {}
        }
    }

    // BMP: BM followed by a file size; require a full header
    if data.len() >= 14 && data.starts_with(b"BM") && data[6..10] == [0, 0, 0, 0] {
        return Some("image/bmp");
    }

    if data.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        return Some("image/x-icon");
    }

    // MP3: ID3 tag or a bare frame sync
    if data.starts_with(b"ID3")
        || data.starts_with(&[0xFF, 0xFB])
        || data.starts_with(&[0xFF, 0xF3])
        || data.starts_with(&[0xFF, 0xF2])
    {
        return Some("audio/mpeg");
    }

    // ISO base media: ....ftyp
    if data.len() >= 8 && &data[4..8] == b"ftyp" {
        return Some("video/mp4");
    }

    if data.starts_with(b"OggS") {
        return Some("audio/ogg");
    }

    None
}

fn detect_zip_flavor(data: &[u8]) -> &'static str {
    // First local file header name starts at offset 30.
    let name = data.get(30..).unwrap_or_default();
    if name.starts_with(b"META-INF/") {
        return "application/java-archive";
    }
    if contains(data, b"word/") {
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    } else if contains(data, b"xl/") {
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    } else if contains(data, b"ppt/") {
        "application/vnd.openxmlformats-officedocument.presentationml.presentation"
    } else {
        "application/zip"
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn detect_text(data: &[u8]) -> Option<&'static str> {
    let text = printable_prefix(data)?;
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();

    if trimmed.starts_with("#!") {
        return Some("text/x-shellscript");
    }

    let head: String = trimmed.chars().take(256).collect::<String>().to_ascii_lowercase();
    if ["<!doctype html", "<html", "<head", "<body", "<script"]
        .iter()
        .any(|tag| head.starts_with(tag))
    {
        return Some("text/html");
    }
    if head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg")) {
        return Some("image/svg+xml");
    }
    if head.starts_with("<?xml") {
        return Some("application/xml");
    }
    if head.starts_with('{') || head.starts_with('[') {
        return Some("application/json");
    }
    if trimmed.is_empty() {
        return None;
    }
    Some("text/plain")
}

/// Returns the data as text if it is UTF-8 without binary control bytes.
///
/// A multi-byte character cut off at the end of the chunk is tolerated.
fn printable_prefix(data: &[u8]) -> Option<&str> {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => {
            // Truncated at the end; valid prefix is guaranteed.
            std::str::from_utf8(&data[..e.valid_up_to()]).ok()?
        }
        Err(_) => return None,
    };
    let binary = text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r' | '\x0c'));
    if binary {
        None
    } else {
        Some(text)
    }
}
