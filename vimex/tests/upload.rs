use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::{Seek, SeekFrom, Write};
use tokio_stream::StreamExt;
use vimex::oauth::{ClientCredentials, ClientCredentialsFlow};
use vimex::{
    BlockingVimeoClient, Endpoints, Error, PendingUpload, PrivacyView, UploadApproach,
    UploadSession, VideoMetadata, VimeoClient,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const VIDEO_LEN: usize = 100;

fn video_bytes() -> Vec<u8> {
    (0..VIDEO_LEN as u8).collect()
}

fn video_file() -> std::fs::File {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&video_bytes()).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file
}

fn async_video_file() -> tokio::fs::File {
    tokio::fs::File::from_std(video_file())
}

fn request_offset(request: &Request) -> u64 {
    request
        .headers
        .get("upload-offset")
        .expect("PATCH without Upload-Offset")
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}

/// A TUS endpoint that acknowledges at most `max_ack` bytes of every chunk.
struct Acknowledge {
    max_ack: u64,
}

impl Respond for Acknowledge {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let acked = (request.body.len() as u64).min(self.max_ack);
        ResponseTemplate::new(204)
            .insert_header("tus-resumable", "1.0.0")
            .insert_header("upload-offset", (request_offset(request) + acked).to_string())
    }
}

fn echo_offset() -> Acknowledge {
    Acknowledge { max_ack: u64::MAX }
}

fn session(server: &MockServer) -> UploadSession {
    UploadSession {
        upload_link: format!("{}/upload/1", server.uri()),
        resource_uri: "/videos/1".into(),
    }
}

async fn patches(server: &MockServer) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method == http::Method::PATCH)
        .collect()
}

fn content_lengths(patches: &[Request]) -> Vec<String> {
    patches
        .iter()
        .map(|r| r.headers["content-length"].to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn chunks_follow_the_server_offset() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/upload/1"))
        .and(header("tus-resumable", "1.0.0"))
        .and(header("content-type", "application/offset+octet-stream"))
        .respond_with(echo_offset())
        .expect(3)
        .mount(&server)
        .await;

    let client = VimeoClient::new();
    let pending = PendingUpload::new(session(&server), VIDEO_LEN as u64);
    let progress: Vec<u64> = client
        .upload_chunks(async_video_file(), pending, Some(40))
        .map(|p| p.unwrap().offset)
        .collect()
        .await;
    assert_eq!(progress, vec![40, 80, 100]);

    let patches = patches(&server).await;
    assert_eq!(content_lengths(&patches), vec!["40", "40", "20"]);
    let offsets: Vec<u64> = patches.iter().map(request_offset).collect();
    assert_eq!(offsets, vec![0, 40, 80]);
    let sent: Vec<u8> = patches.iter().flat_map(|r| r.body.clone()).collect();
    assert_eq!(sent, video_bytes());
}

#[tokio::test]
async fn partial_acknowledgements_are_resent() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/upload/1"))
        .respond_with(Acknowledge { max_ack: 30 })
        .mount(&server)
        .await;

    let client = VimeoClient::new();
    let pending = PendingUpload::new(session(&server), VIDEO_LEN as u64);
    let progress: Vec<u64> = client
        .upload_chunks(async_video_file(), pending, Some(40))
        .map(|p| p.unwrap().offset)
        .collect()
        .await;
    assert_eq!(progress, vec![30, 60, 90, 100]);

    let patches = patches(&server).await;
    assert_eq!(content_lengths(&patches), vec!["40", "40", "40", "10"]);
    let video = video_bytes();
    for patch in &patches {
        let offset = request_offset(patch) as usize;
        assert_eq!(patch.body, video[offset..offset + patch.body.len()]);
    }
}

#[tokio::test]
async fn unbounded_chunk_size_sends_everything_at_once() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(echo_offset())
        .expect(2)
        .mount(&server)
        .await;

    let client = VimeoClient::new();
    for chunk_size in [None, Some(0)] {
        let pending = PendingUpload::new(session(&server), VIDEO_LEN as u64);
        let stream = client.upload_chunks(async_video_file(), pending, chunk_size);
        let progress: Vec<_> = stream.collect().await;
        assert_eq!(progress.len(), 1);
        assert!(progress[0].as_ref().unwrap().is_complete());
    }
    assert_eq!(content_lengths(&patches(&server).await), vec!["100", "100"]);
}

#[tokio::test]
async fn failed_chunk_ends_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(460).set_body_string("checksum mismatch"))
        .expect(1)
        .mount(&server)
        .await;

    let client = VimeoClient::new();
    let pending = PendingUpload::new(session(&server), VIDEO_LEN as u64);
    let results: Vec<_> = client
        .upload_chunks(async_video_file(), pending, Some(40))
        .collect()
        .await;
    assert_eq!(results.len(), 1);
    assert!(
        matches!(&results[0], Err(Error::Upload { payload, .. }) if payload == "checksum mismatch"),
        "{results:?}"
    );
}

#[tokio::test]
async fn missing_offset_header_is_an_upload_error() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = VimeoClient::new();
    let pending = PendingUpload::new(session(&server), VIDEO_LEN as u64);
    let err = client
        .upload(async_video_file(), pending)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upload { .. }), "{err:?}");
}

#[tokio::test]
async fn interrupted_upload_resumes_from_the_server_offset() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/upload/1"))
        .and(header("tus-resumable", "1.0.0"))
        .respond_with(ResponseTemplate::new(200).insert_header("upload-offset", "60"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/upload/1"))
        .respond_with(echo_offset())
        .mount(&server)
        .await;

    let client = VimeoClient::new();
    let pending = client
        .resume_upload(session(&server), VIDEO_LEN as u64)
        .await
        .unwrap();
    assert_eq!(pending.offset, 60);

    let progress: Vec<u64> = client
        .upload_chunks(async_video_file(), pending, Some(25))
        .map(|p| p.unwrap().offset)
        .collect()
        .await;
    assert_eq!(progress, vec![85, 100]);

    let patches = patches(&server).await;
    let sent: Vec<u8> = patches.iter().flat_map(|r| r.body.clone()).collect();
    assert_eq!(sent, video_bytes()[60..]);
}

#[tokio::test]
async fn session_creation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/me/videos"))
        .and(header("accept", "application/vnd.vimeo.*+json;version=3.4"))
        .and(header("authorization", "Bearer tok"))
        .and(body_json(json!({
            "upload": {"approach": "tus", "size": "100"},
            "name": "holiday",
            "privacy": {"view": "nobody"},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uri": "/videos/1",
            "upload": {"approach": "tus", "upload_link": "https://files.tus.vimeo.com/files/1"},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = VimeoClient::new()
        .with_endpoints(Endpoints::with_root(&server.uri()).unwrap())
        .with_auth(
            ClientCredentialsFlow::new(ClientCredentials::new("id", "secret"))
                .with_access_token("tok"),
        );
    let metadata = VideoMetadata::new()
        .with_name("holiday")
        .with_privacy(PrivacyView::Nobody);
    let session = client
        .create_upload_session(100, UploadApproach::Tus, &metadata)
        .await
        .unwrap();
    assert_eq!(
        session,
        UploadSession {
            upload_link: "https://files.tus.vimeo.com/files/1".into(),
            resource_uri: "/videos/1".into(),
        }
    );
}

#[tokio::test]
async fn session_errors_are_upload_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/me/videos"))
        .and(header("authorization", "Bearer quota"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"error": "quota exceeded"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/me/videos"))
        .and(header("authorization", "Bearer no_link"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"uri": "/videos/1", "upload": {"approach": "tus"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/me/videos"))
        .and(header("authorization", "Bearer no_uri"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"upload": {"upload_link": "https://files.tus.vimeo.com/files/1"}}),
        ))
        .mount(&server)
        .await;

    for (token, expected) in [
        ("quota", "quota exceeded"),
        ("no_link", "no upload.upload_link in response"),
        ("no_uri", "no uri in response"),
    ] {
        let client = VimeoClient::new()
            .with_endpoints(Endpoints::with_root(&server.uri()).unwrap())
            .with_auth(
                ClientCredentialsFlow::new(ClientCredentials::new("id", "secret"))
                    .with_access_token(token),
            );
        let err = client
            .create_upload_session(100, UploadApproach::Tus, &VideoMetadata::default())
            .await
            .unwrap_err();
        match err {
            Error::Upload { reason, payload } => assert!(
                reason.contains(expected) || payload.contains(expected),
                "{reason}: {payload}"
            ),
            other => panic!("expected an upload error, got {other:?}"),
        }
    }
}

async fn mock_tus_service(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/me/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uri": "/videos/1",
            "upload": {"upload_link": format!("{}/upload/1", server.uri())},
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/upload/1"))
        .respond_with(echo_offset())
        .expect(3)
        .mount(server)
        .await;
}

#[tokio::test]
async fn tus_upload_end_to_end() {
    let server = MockServer::start().await;
    mock_tus_service(&server).await;

    let client = VimeoClient::new().with_endpoints(Endpoints::with_root(&server.uri()).unwrap());
    let uri = client
        .tus_upload(async_video_file(), Some(40), &VideoMetadata::new())
        .await
        .unwrap();
    assert_eq!(uri, "/videos/1");
    let sent: Vec<u8> = patches(&server)
        .await
        .iter()
        .flat_map(|r| r.body.clone())
        .collect();
    assert_eq!(sent, video_bytes());
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_upload() {
    let server = MockServer::start().await;
    mock_tus_service(&server).await;

    let endpoints = Endpoints::with_root(&server.uri()).unwrap();
    let uri = tokio::task::spawn_blocking(move || {
        let client = BlockingVimeoClient::new().with_endpoints(endpoints);
        client.tus_upload(video_file(), Some(40), &VideoMetadata::new())
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(uri, "/videos/1");
    assert_eq!(
        content_lengths(&patches(&server).await),
        vec!["40", "40", "20"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_chunks_stop_after_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(echo_offset())
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let session = session(&server);
    let (results, last) = tokio::task::spawn_blocking(move || {
        let client = BlockingVimeoClient::new();
        let mut chunks =
            client.upload_chunks(video_file(), PendingUpload::new(session, VIDEO_LEN as u64), Some(40));
        let results: Vec<_> = chunks.by_ref().collect();
        (results, chunks.pending().clone())
    })
    .await
    .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap().offset, 40);
    assert!(matches!(results[1], Err(Error::Upload { .. })));
    assert_eq!(last.offset, 40);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_single_shot_from_a_later_position() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(echo_offset())
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server);
    let done = tokio::task::spawn_blocking(move || {
        let mut file = video_file();
        file.seek(SeekFrom::Start(30)).unwrap();
        let size = vimex::upload::remaining_len(&mut file).unwrap();
        BlockingVimeoClient::new().upload(file, PendingUpload::new(session, size))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(done.offset, 70);
    let patches = patches(&server).await;
    assert_eq!(patches[0].body, video_bytes()[30..]);
}
