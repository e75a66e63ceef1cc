use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use axum::Router;
use uuid::Uuid;

/// Single-line `--dump-json` output for a YouTube video with one DASH video
/// stream, one m4a audio stream and the 360p progressive file.
pub const YOUTUBE_INFO_JSON: &str = r#"{"id": "aqz-KE-bpKQ", "title": "Big Buck Bunny", "thumbnail": "https://i.ytimg.com/vi/aqz-KE-bpKQ/maxresdefault.jpg", "duration": 596, "extractor_key": "Youtube", "uploader": null, "channel": "Blender", "view_count": "1234567", "formats": [{"format_id": "137", "ext": "mp4", "vcodec": "avc1.640028", "acodec": "none", "height": 1080, "width": 1920, "tbr": 4400.1, "filesize": 90000000}, {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5, "filesize": 3400000}, {"format_id": "18", "ext": "mp4", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360, "width": 640, "filesize_approx": 21000000}]}"#;

pub fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("linkdrop-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes an executable `/bin/sh` script standing in for yt-dlp.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Serves `router` on an ephemeral local port for the rest of the test.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
