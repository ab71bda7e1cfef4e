//! HTMLページとアップロード用の補助関数

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;

use crate::ml::Prediction;

/// アップロードを許可する拡張子
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// 許可された拡張子か
pub fn allowed_file(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// ファイル名を安全な形に変換（空になる場合は None）
///
/// パス区切りを除いた最後の要素だけを使い、英数字と `.` `-` `_` 以外は `_` に置き換える。
/// 拡張子は残し、本体が空になった場合は `upload` とする。
pub fn secure_filename(filename: &str) -> Option<String> {
    fn clean(text: &str) -> String {
        text.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>()
            .trim_matches(&['.', '_'][..])
            .to_string()
    }

    let base = filename.rsplit(&['/', '\\'][..]).next().unwrap_or_default().trim();
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (clean(stem), clean(ext)),
        _ => (clean(base), String::new()),
    };

    match (stem.is_empty(), ext.is_empty()) {
        (true, true) => None,
        (true, false) => Some(format!("upload.{}", ext)),
        (false, true) => Some(stem),
        (false, false) => Some(format!("{}.{}", stem, ext)),
    }
}

/// 拡張子からMIMEタイプ
pub fn mime_type(filename: &str) -> &'static str {
    match Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// フラッシュメッセージ付きのリダイレクト先
pub fn flash_location(target: &str, message: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    format!("{}?flash={}", target, encoded)
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

fn layout(body: &str, flash: Option<&str>) -> String {
    let flash_html = flash
        .map(|m| format!("<ul class=\"flashes\"><li>{}</li></ul>", escape_html(m)))
        .unwrap_or_default();
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>Fruit Classifier</title></head>\n<body>\n<h2>Fruit Classifier</h2>\n{}\n{}\n</body>\n</html>\n",
        flash_html, body
    )
}

/// アップロードフォーム
pub fn upload_page(flash: Option<&str>) -> String {
    let body = "<p>Select an image to upload and classify</p>\n\
<form method=\"post\" action=\"/\" enctype=\"multipart/form-data\">\n\
<input type=\"file\" name=\"file\" autocomplete=\"off\" required>\n\
<input type=\"submit\" value=\"Upload\">\n\
</form>";
    layout(body, flash)
}

/// アップロード画像の確認ページ
pub fn confirm_page(filename: &str, image_bytes: &[u8], flash: Option<&str>) -> String {
    let name = escape_html(filename);
    let body = format!(
        "<p>{}</p>\n<img src=\"{}\" width=\"400\">\n<p><a href=\"/classify/{}\">Classify</a> | <a href=\"/\">Upload another</a></p>",
        name,
        data_uri(mime_type(filename), image_bytes),
        name
    );
    layout(&body, flash)
}

/// 分類結果ページ
pub fn result_page(filename: &str, prediction: &Prediction, annotated_png: &[u8]) -> String {
    let body = format!(
        "<p>{}</p>\n<h3>{}</h3>\n<img src=\"{}\">\n<p><a href=\"/\">Upload another</a></p>",
        escape_html(filename),
        escape_html(&prediction.display_text()),
        data_uri("image/png", annotated_png)
    );
    layout(&body, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_file() {
        assert!(allowed_file("apple.PNG"));
        assert!(allowed_file("a.b.jpeg"));
        assert!(!allowed_file("notes.txt"));
        assert!(!allowed_file("noext"));
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(secure_filename("my apple.png").as_deref(), Some("my_apple.png"));
        assert_eq!(secure_filename("C:\\photos\\pear.jpg").as_deref(), Some("pear.jpg"));
        assert_eq!(secure_filename("..."), None);
        assert_eq!(secure_filename("日本語.jpg").as_deref(), Some("upload.jpg"));
        assert_eq!(secure_filename(""), None);
    }

    #[test]
    fn test_flash_location_is_encoded() {
        assert_eq!(flash_location("/", "No selected file"), "/?flash=No+selected+file");
    }

    #[test]
    fn test_result_page_embeds_base64() {
        let prediction = Prediction {
            label: "<apple>".to_string(),
            probability: 0.5,
            probabilities: vec![0.5, 0.5],
        };
        let html = result_page("a.png", &prediction, &[1, 2, 3]);
        assert!(html.contains("data:image/png;base64,AQID"));
        assert!(html.contains("&lt;apple&gt;: 50.00%"));
    }
}
