//! 画像アップロードと分類のWebフロントエンド
//!
//! - `GET /` アップロードフォーム（アップロード先を空にする）
//! - `POST /` 画像を受け取り確認ページへリダイレクト
//! - `GET /confirm/:filename` アップロード画像の確認
//! - `GET /classify/:filename` 分類結果（注釈付き画像をbase64で埋め込む）

pub mod pages;
pub mod worker;

pub use worker::{ClassifiedImage, EngineClassifier, ImageClassifier, InferenceWorker};

use axum::{
    extract::{Multipart, Path as UrlPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use pages::{allowed_file, confirm_page, flash_location, result_page, secure_filename, upload_page, ALLOWED_EXTENSIONS};

/// サーバーの共有状態
pub struct WebState {
    pub upload_dir: PathBuf,
    pub worker: InferenceWorker,
}

pub type SharedState = Arc<WebState>;

/// ハンドラのエラー（500を返す）
pub struct WebError(anyhow::Error);

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        error!("リクエスト処理エラー: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {}", self.0)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for WebError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FlashQuery {
    pub flash: Option<String>,
}

/// ルーターを構築
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(upload_form).post(upload_image))
        .route("/confirm/:filename", get(confirm_upload))
        .route("/classify/:filename", get(classify_upload))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn redirect_with_flash(target: &str, message: &str) -> Response {
    Redirect::to(&flash_location(target, message)).into_response()
}

/// アップロード先を空にする
async fn clear_upload_dir(dir: &std::path::Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

/// `GET /`
pub async fn upload_form(
    State(state): State<SharedState>,
    Query(query): Query<FlashQuery>,
) -> Result<Html<String>, WebError> {
    clear_upload_dir(&state.upload_dir).await?;
    Ok(Html(upload_page(query.flash.as_deref())))
}

/// `POST /`
pub async fn upload_image(State(state): State<SharedState>, mut multipart: Multipart) -> Result<Response, WebError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        upload = Some((name, data.to_vec()));
    }

    let Some((name, data)) = upload else {
        return Ok(redirect_with_flash("/", "No file part"));
    };
    if name.is_empty() || data.is_empty() {
        return Ok(redirect_with_flash("/", "No image selected for uploading"));
    }
    if !allowed_file(&name) {
        return Ok(redirect_with_flash(
            "/",
            &format!("Allowed image types are -> {}", ALLOWED_EXTENSIONS.join(", ")),
        ));
    }
    let Some(filename) = secure_filename(&name) else {
        return Ok(redirect_with_flash("/", "Invalid file name"));
    };

    tokio::fs::create_dir_all(&state.upload_dir).await?;
    let path = state.upload_dir.join(&filename);
    tokio::fs::write(&path, &data).await?;
    info!("アップロード: {} ({} bytes)", path.display(), data.len());

    Ok(redirect_with_flash(
        &format!("/confirm/{}", filename),
        "Image successfully uploaded and displayed below",
    ))
}

async fn uploaded_path(state: &WebState, filename: &str) -> Option<PathBuf> {
    let safe = secure_filename(filename)?;
    let path = state.upload_dir.join(safe);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Some(path),
        _ => None,
    }
}

/// `GET /confirm/:filename`
pub async fn confirm_upload(
    State(state): State<SharedState>,
    UrlPath(filename): UrlPath<String>,
    Query(query): Query<FlashQuery>,
) -> Result<Response, WebError> {
    let Some(path) = uploaded_path(&state, &filename).await else {
        warn!("アップロード画像が見つかりません: {}", filename);
        return Ok(redirect_with_flash("/", "Uploaded image not found"));
    };
    let bytes = tokio::fs::read(&path).await?;
    Ok(Html(confirm_page(&filename, &bytes, query.flash.as_deref())).into_response())
}

/// `GET /classify/:filename`
pub async fn classify_upload(
    State(state): State<SharedState>,
    UrlPath(filename): UrlPath<String>,
) -> Result<Response, WebError> {
    let Some(path) = uploaded_path(&state, &filename).await else {
        warn!("アップロード画像が見つかりません: {}", filename);
        return Ok(redirect_with_flash("/", "Uploaded image not found"));
    };
    match state.worker.classify(path).await {
        Ok(result) => {
            info!("分類結果 {}: {}", filename, result.prediction.display_text());
            Ok(Html(result_page(&filename, &result.prediction, &result.annotated_png)).into_response())
        }
        Err(e) => {
            error!("分類に失敗しました {}: {:#}", filename, e);
            Ok(redirect_with_flash("/", "Image could not be classified"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::worker::tests::NameClassifier;
    use axum::body::to_bytes;
    use axum::http::header::LOCATION;

    fn state(dir: &std::path::Path) -> SharedState {
        Arc::new(WebState {
            upload_dir: dir.join("uploads"),
            worker: InferenceWorker::spawn(|| Ok(NameClassifier)).unwrap(),
        })
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_upload_form_clears_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        std::fs::create_dir_all(&state.upload_dir).unwrap();
        std::fs::write(state.upload_dir.join("old.png"), b"x").unwrap();

        let Html(html) = upload_form(
            State(state.clone()),
            Query(FlashQuery {
                flash: Some("hello".to_string()),
            }),
        )
        .await
        .map_err(|e| e.0)
        .unwrap();
        assert!(html.contains("hello"));
        assert!(state.upload_dir.is_dir());
        assert!(!state.upload_dir.join("old.png").exists());
    }

    #[tokio::test]
    async fn test_clear_upload_dir_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("app").join("uploads");
        clear_upload_dir(&uploads).await.unwrap();
        assert!(uploads.is_dir());

        tokio::fs::write(uploads.join("a.png"), b"x").await.unwrap();
        clear_upload_dir(&uploads).await.unwrap();
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_uploaded_path_requires_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        std::fs::create_dir_all(state.upload_dir.join("folder.png")).unwrap();
        std::fs::write(state.upload_dir.join("pear.png"), b"x").unwrap();

        assert!(uploaded_path(&state, "folder.png").await.is_none());
        assert!(uploaded_path(&state, "missing.png").await.is_none());
        assert_eq!(
            uploaded_path(&state, "pear.png").await,
            Some(state.upload_dir.join("pear.png"))
        );
    }

    #[tokio::test]
    async fn test_classify_renders_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        std::fs::create_dir_all(&state.upload_dir).unwrap();
        image::RgbImage::new(6, 6).save(state.upload_dir.join("apple.png")).unwrap();

        let response = classify_upload(State(state.clone()), UrlPath("apple.png".to_string()))
            .await
            .map_err(|e| e.0)
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("apple: 90.00%"));
        assert!(html.contains("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_missing_upload_redirects_with_flash() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let response = confirm_upload(
            State(state),
            UrlPath("nothing.png".to_string()),
            Query(FlashQuery::default()),
        )
        .await
        .map_err(|e| e.0)
        .unwrap();
        assert!(response.status().is_redirection());
        let location = response.headers()[LOCATION].to_str().unwrap().to_string();
        assert_eq!(location, "/?flash=Uploaded+image+not+found");
    }
}
