use crate::models::{MediaRef, Message};
use chrono::{SecondsFormat, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Zstandard frame magic. Compressed payloads are recovered only when the
/// hex copy starts with it.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// One row of a `Msg_<hash>` chat table, as read from the database.
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    pub local_id: i64,
    pub server_id: i64,
    pub raw_type: i64,
    pub sender_id: i64,
    pub create_time: i64,
    pub status: i64,
    pub content: String,
    pub compression: i64,
    pub hex_content: String,
}

/// Decodes a chat-table row into a neutral `Message`. Returns `None` for
/// rows with nothing to keep: blank text rows, unknown kinds, and compressed
/// non-text rows whose payload cannot be recovered.
pub fn decode_row(row: &RawRow) -> Option<Message> {
    // low 16 bits select the message kind; high bits are sub-type noise
    let kind = row.raw_type & 0xffff;

    let mut content = row.content.clone();
    if row.compression != 0 {
        match recover_compressed(&row.hex_content) {
            Some(text) => content = text,
            None if kind == 1 => content = "[compressed text]".to_string(),
            None => return None,
        }
    }

    let mut content_type = "text";
    let mut media: Vec<MediaRef> = Vec::new();

    match kind {
        1 => {
            if content.trim().is_empty() {
                return None;
            }
        }
        3 => {
            content_type = "image";
            content = "[image]".to_string();
            media.push(MediaRef::new("image"));
        }
        34 => {
            content_type = "audio";
            content = "[voice]".to_string();
            media.push(MediaRef::new("voice"));
        }
        43 => {
            content_type = "video";
            content = "[video]".to_string();
            media.push(MediaRef::new("video"));
        }
        47 => {
            content_type = "sticker";
            content = "[sticker]".to_string();
        }
        48 => {
            content_type = "location";
            content = "[location]".to_string();
        }
        49 => {
            content_type = "link";
            let (label, refs) = decode_appmsg(&content);
            content = label;
            media = refs;
        }
        // system notice and revoke notice pass through as text
        10000 | 10002 => {}
        _ => return None,
    }

    let role = if row.status == 3 { "user" } else { "assistant" };

    Some(Message {
        role: role.to_string(),
        content,
        timestamp: timestamp_utc(row.create_time),
        message_id: row.local_id.to_string(),
        content_type: content_type.to_string(),
        media,
    })
}

/// Hex-decode, check the zstd magic, stream-decode, and replace invalid
/// UTF-8 bytes.
fn recover_compressed(hex_content: &str) -> Option<String> {
    if hex_content.is_empty() {
        return None;
    }
    let raw = hex::decode(hex_content).ok()?;
    if raw.len() < 4 || raw[..4] != ZSTD_MAGIC {
        return None;
    }
    let decoded = zstd::stream::decode_all(&raw[..]).ok()?;
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

fn timestamp_utc(epoch_secs: i64) -> String {
    if epoch_secs == 0 {
        return String::new();
    }
    match Utc.timestamp_opt(epoch_secs, 0).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, false),
        None => String::new(),
    }
}

/// Decodes a kind-49 appmsg XML fragment into an inline label plus media
/// metadata. Group messages prefix the XML with `<sender-id>:\n`, which is
/// stripped by searching for the `<msg` element.
pub fn decode_appmsg(raw: &str) -> (String, Vec<MediaRef>) {
    if raw.trim().is_empty() {
        return ("[link/file]".to_string(), Vec::new());
    }

    let xml = match raw.find("<msg") {
        Some(i) => &raw[i..],
        None if raw.trim_start().starts_with('<') => raw,
        None => return ("[link/file]".to_string(), Vec::new()),
    };

    let doc = match roxmltree::Document::parse(xml) {
        Ok(doc) => doc,
        Err(_) => return appmsg_fallback(raw),
    };

    let root = doc.root_element();
    let appmsg = root
        .descendants()
        .find(|n| n.has_tag_name("appmsg"))
        .unwrap_or(root);

    let title = child_text(appmsg, "title");
    let description = child_text(appmsg, "des");
    let url = child_text(appmsg, "url");
    let sub_type: i64 = child_text(appmsg, "type").parse().unwrap_or(0);

    let mut file_size: u64 = 0;
    let mut attach_filename = String::new();
    if let Some(attach) = appmsg.children().find(|n| n.has_tag_name("appattach")) {
        file_size = child_text(attach, "totallen").parse().unwrap_or(0);
        attach_filename = child_text(attach, "attachfilename");
    }
    let filename = if attach_filename.is_empty() { title.clone() } else { attach_filename };

    match sub_type {
        6 => {
            let size_str = format_size(file_size);
            let size_part = if size_str.is_empty() {
                String::new()
            } else {
                format!(" ({size_str})")
            };
            let media = MediaRef {
                kind: "file".into(),
                filename: filename.clone(),
                original_url: url,
                size_bytes: file_size,
                description,
                ..Default::default()
            };
            (format!("[file: {filename}{size_part}]"), vec![media])
        }
        5 => {
            let label = titled_label("link", &title);
            let media = MediaRef {
                kind: "link".into(),
                filename: title,
                original_url: url,
                description,
                ..Default::default()
            };
            (label, vec![media])
        }
        33 | 36 => {
            let label = titled_label("mini_program", &title);
            let media = MediaRef {
                kind: "mini_program".into(),
                filename: title,
                original_url: url,
                ..Default::default()
            };
            (label, vec![media])
        }
        57 => {
            let snippet = appmsg
                .children()
                .find(|n| n.has_tag_name("refermsg"))
                .map(|r| child_text(r, "content"))
                .unwrap_or_default();
            let snippet = truncate_chars(&snippet, 80);
            let quote = if snippet.is_empty() {
                "[quote]".to_string()
            } else {
                format!("[quote: {snippet}]")
            };
            let label = if title.is_empty() { quote } else { format!("{title}\n{quote}") };
            (label, Vec::new())
        }
        19 => (titled_label("chat_history", &title), Vec::new()),
        4 => {
            let label = titled_label("music", &title);
            let media = MediaRef {
                kind: "link".into(),
                filename: title,
                original_url: url,
                ..Default::default()
            };
            (label, vec![media])
        }
        51 => {
            let label = titled_label("video_channel", &title);
            let media = MediaRef {
                kind: "link".into(),
                filename: title,
                original_url: url,
                ..Default::default()
            };
            (label, vec![media])
        }
        53 => ("[group_call]".to_string(), Vec::new()),
        87 => (titled_label("announcement", &title), Vec::new()),
        2000 => ("[transfer]".to_string(), Vec::new()),
        2001 => ("[red_packet]".to_string(), Vec::new()),
        _ => {
            if title.is_empty() {
                ("[link/file]".to_string(), Vec::new())
            } else {
                let media = MediaRef {
                    kind: "link".into(),
                    filename: title.clone(),
                    original_url: url,
                    description,
                    ..Default::default()
                };
                (format!("[link: {title}]"), vec![media])
            }
        }
    }
}

/// Malformed XML still often carries a usable `<title>`.
fn appmsg_fallback(raw: &str) -> (String, Vec<MediaRef>) {
    static TITLE_RE: OnceLock<Regex> = OnceLock::new();
    let re = TITLE_RE.get_or_init(|| Regex::new(r"<title>([^<]+)</title>").unwrap());
    if let Some(caps) = re.captures(raw) {
        let title = caps[1].trim().to_string();
        if !title.is_empty() {
            let media = MediaRef {
                kind: "link".into(),
                filename: title.clone(),
                ..Default::default()
            };
            return (format!("[link: {title}]"), vec![media]);
        }
    }
    ("[link/file]".to_string(), Vec::new())
}

fn child_text(node: roxmltree::Node, tag: &str) -> String {
    node.children()
        .find(|c| c.has_tag_name(tag))
        .and_then(|c| c.text())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn titled_label(kind: &str, title: &str) -> String {
    if title.is_empty() {
        format!("[{kind}]")
    } else {
        format!("[{kind}: {title}]")
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.trim().chars().take(max).collect()
}

/// `1234567` → `1.2MB`. Zero and negative sizes format as empty.
pub fn format_size(size_bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;
    match size_bytes {
        0 => String::new(),
        n if n < KIB => format!("{n}B"),
        n if n < MIB => format!("{:.1}KB", n as f64 / KIB as f64),
        n if n < GIB => format!("{:.1}MB", n as f64 / MIB as f64),
        n => format!("{:.1}GB", n as f64 / GIB as f64),
    }
}

/// Keeps Unicode alphanumerics and `-`/`_`; everything else becomes `_`.
pub fn sanitize_id(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_row(content: &str) -> RawRow {
        RawRow {
            local_id: 1,
            raw_type: 1,
            create_time: 1_700_000_000,
            status: 3,
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn plain_text_row_decodes() {
        let msg = decode_row(&text_row("hello")).unwrap();
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.content_type, "text");
        assert_eq!(msg.timestamp, "2023-11-14T22:13:20+00:00");
        assert!(msg.media.is_empty());
    }

    #[test]
    fn received_text_row_maps_to_assistant() {
        let mut row = text_row("hi there");
        row.status = 2;
        let msg = decode_row(&row).unwrap();
        assert_eq!(msg.role, "assistant");
    }

    #[test]
    fn blank_text_row_is_dropped() {
        assert!(decode_row(&text_row("   ")).is_none());
    }

    #[test]
    fn compressed_text_row_recovers_payload() {
        let compressed = zstd::stream::encode_all(&b"hi"[..], 3).unwrap();
        let mut row = text_row("");
        row.compression = 4;
        row.hex_content = hex::encode(compressed);

        let msg = decode_row(&row).unwrap();
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn unrecoverable_compressed_text_gets_placeholder() {
        let mut row = text_row("");
        row.compression = 4;
        row.hex_content = "deadbeef".to_string(); // wrong magic
        let msg = decode_row(&row).unwrap();
        assert_eq!(msg.content, "[compressed text]");
    }

    #[test]
    fn unrecoverable_compressed_non_text_is_dropped() {
        let mut row = text_row("");
        row.raw_type = 49;
        row.compression = 4;
        row.hex_content = "deadbeef".to_string();
        assert!(decode_row(&row).is_none());
    }

    #[test]
    fn media_kinds_get_placeholders() {
        for (kind, content, media_kind) in [
            (3i64, "[image]", Some("image")),
            (34, "[voice]", Some("voice")),
            (43, "[video]", Some("video")),
            (47, "[sticker]", None),
            (48, "[location]", None),
        ] {
            let mut row = text_row("ignored payload");
            row.raw_type = kind;
            let msg = decode_row(&row).unwrap();
            assert_eq!(msg.content, content, "kind {kind}");
            match media_kind {
                Some(mk) => {
                    assert_eq!(msg.media.len(), 1);
                    assert_eq!(msg.media[0].kind, mk);
                }
                None => assert!(msg.media.is_empty()),
            }
        }
    }

    #[test]
    fn high_bits_of_type_are_ignored() {
        let mut row = text_row("hello");
        row.raw_type = (7 << 16) | 1;
        let msg = decode_row(&row).unwrap();
        assert_eq!(msg.content_type, "text");
    }

    #[test]
    fn system_notice_passes_through() {
        let mut row = text_row("You recalled a message");
        row.raw_type = 10000;
        let msg = decode_row(&row).unwrap();
        assert_eq!(msg.content, "You recalled a message");
        assert_eq!(msg.content_type, "text");
    }

    #[test]
    fn unknown_kind_is_dropped() {
        let mut row = text_row("whatever");
        row.raw_type = 50;
        assert!(decode_row(&row).is_none());
    }

    #[test]
    fn decoding_is_deterministic() {
        let mut row = text_row("");
        row.raw_type = 49;
        row.content = file_card_xml();
        let a = decode_row(&row).unwrap();
        let b = decode_row(&row).unwrap();
        assert_eq!(a, b);
    }

    fn file_card_xml() -> String {
        concat!(
            "<msg><appmsg><title>report.pdf</title><type>6</type>",
            "<appattach><totallen>1048576</totallen><fileext>pdf</fileext></appattach>",
            "</appmsg></msg>"
        )
        .to_string()
    }

    #[test]
    fn file_card_decodes_with_size() {
        let (label, media) = decode_appmsg(&file_card_xml());
        assert_eq!(label, "[file: report.pdf (1.0MB)]");
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].kind, "file");
        assert_eq!(media[0].filename, "report.pdf");
        assert_eq!(media[0].size_bytes, 1_048_576);
    }

    #[test]
    fn file_card_through_decode_row() {
        let mut row = text_row("");
        row.raw_type = 49;
        row.content = file_card_xml();
        let msg = decode_row(&row).unwrap();
        assert_eq!(msg.content, "[file: report.pdf (1.0MB)]");
        assert_eq!(msg.content_type, "link");
    }

    #[test]
    fn group_sender_prefix_is_stripped() {
        let raw = format!("wxid_abc123:\n{}", file_card_xml());
        let (label, _) = decode_appmsg(&raw);
        assert_eq!(label, "[file: report.pdf (1.0MB)]");
    }

    #[test]
    fn link_card_uses_title() {
        let xml = "<msg><appmsg><title>Rust in 2026</title><type>5</type>\
                   <url>https://example.com/post</url><des>a retrospective</des></appmsg></msg>";
        let (label, media) = decode_appmsg(xml);
        assert_eq!(label, "[link: Rust in 2026]");
        assert_eq!(media[0].kind, "link");
        assert_eq!(media[0].original_url, "https://example.com/post");
        assert_eq!(media[0].description, "a retrospective");
    }

    #[test]
    fn quote_card_includes_snippet_and_reply() {
        let xml = "<msg><appmsg><title>sounds good</title><type>57</type>\
                   <refermsg><content>let's meet at 3pm tomorrow</content></refermsg></appmsg></msg>";
        let (label, media) = decode_appmsg(xml);
        assert_eq!(label, "sounds good\n[quote: let's meet at 3pm tomorrow]");
        assert!(media.is_empty());
    }

    #[test]
    fn quote_snippet_is_capped_at_80_chars() {
        let long = "x".repeat(200);
        let xml = format!(
            "<msg><appmsg><type>57</type><refermsg><content>{long}</content></refermsg></appmsg></msg>"
        );
        let (label, _) = decode_appmsg(&xml);
        assert_eq!(label, format!("[quote: {}]", "x".repeat(80)));
    }

    #[test]
    fn transfer_and_red_packet() {
        let t = "<msg><appmsg><type>2000</type></appmsg></msg>";
        assert_eq!(decode_appmsg(t).0, "[transfer]");
        let r = "<msg><appmsg><type>2001</type></appmsg></msg>";
        assert_eq!(decode_appmsg(r).0, "[red_packet]");
    }

    #[test]
    fn unknown_subtype_with_title_becomes_link() {
        let xml = "<msg><appmsg><title>Something</title><type>9999</type></appmsg></msg>";
        let (label, media) = decode_appmsg(xml);
        assert_eq!(label, "[link: Something]");
        assert_eq!(media[0].kind, "link");
    }

    #[test]
    fn malformed_xml_falls_back_to_title_regex() {
        let raw = "<msg><appmsg><title>Broken doc</title><type>5</appmsg>";
        let (label, media) = decode_appmsg(raw);
        assert_eq!(label, "[link: Broken doc]");
        assert_eq!(media[0].filename, "Broken doc");
    }

    #[test]
    fn non_xml_payload_becomes_generic_label() {
        let (label, media) = decode_appmsg("just some text");
        assert_eq!(label, "[link/file]");
        assert!(media.is_empty());
    }

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(0), "");
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(1_048_576), "1.0MB");
        assert_eq!(format_size(1_234_567), "1.2MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0GB");
    }

    #[test]
    fn sanitize_id_keeps_unicode_letters() {
        assert_eq!(sanitize_id("wxid_abc-123"), "wxid_abc-123");
        assert_eq!(sanitize_id("team@chatroom"), "team_chatroom");
        assert_eq!(sanitize_id("张三"), "张三");
    }
}
