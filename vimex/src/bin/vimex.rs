use eyre::{Context, bail};
use std::io::IsTerminal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vimex::oauth::{
    AuthorizationCodeFlow, ClientCredentials, ClientCredentialsFlow, DeviceCodeFlow, Flow,
    ImplicitGrantFlow,
};
use vimex::{VideoMetadata, VimeoClient};

const USAGE: &str =
    "usage: vimex <client-credentials|authorization-code|implicit|device> [FILE] [CHUNK_SIZE]";

const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

fn flow(name: &str, credentials: ClientCredentials) -> eyre::Result<Flow> {
    let flow = match name {
        "client-credentials" => ClientCredentialsFlow::new(credentials).into(),
        "authorization-code" => AuthorizationCodeFlow::with_random_state(credentials).into(),
        "implicit" => ImplicitGrantFlow::with_random_state(credentials).into(),
        "device" => DeviceCodeFlow::new(credentials).into(),
        other => bail!("unknown grant flow {other:?}\n{USAGE}"),
    };
    Ok(flow)
}

fn with_cached_token(flow: Flow, token: String) -> Flow {
    match flow {
        Flow::ClientCredentials(f) => f.with_access_token(token).into(),
        Flow::AuthorizationCode(f) => f.with_access_token(token).into(),
        Flow::Implicit(f) => f.with_access_token(token).into(),
        Flow::DeviceCode(f) => f.with_access_token(token).into(),
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(grant) = args.next() else {
        bail!(USAGE);
    };
    let file = args.next();
    let chunk_size = match args.next() {
        Some(size) => size.parse().context("parse chunk size")?,
        None => DEFAULT_CHUNK_SIZE,
    };

    let client_id = std::env::var("VIMEO_CLIENT_ID").context("VIMEO_CLIENT_ID must be set")?;
    let client_secret =
        std::env::var("VIMEO_CLIENT_SECRET").context("VIMEO_CLIENT_SECRET must be set")?;
    let mut flow = flow(&grant, ClientCredentials::new(client_id, client_secret))?;
    if let Ok(token) = std::env::var("VIMEO_ACCESS_TOKEN") {
        flow = with_cached_token(flow, token);
    }

    let client = VimeoClient::new().with_auth(flow);
    let Some(token) = client
        .acquire_token()
        .await
        .context("acquire access token")?
    else {
        bail!("no access token was granted");
    };
    eprintln!("==> access token acquired");
    // printed so it can be reused through VIMEO_ACCESS_TOKEN
    println!("{}", token.secret());

    if let Some(path) = file {
        let name = std::path::Path::new(&path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let mut metadata = VideoMetadata::new();
        if let Some(name) = name {
            metadata = metadata.with_name(name);
        }

        let video = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("open {path}"))?;
        let uri = client
            .tus_upload(video, Some(chunk_size), &metadata)
            .await
            .with_context(|| format!("upload {path}"))?;
        eprintln!("==> uploaded {path}");
        println!("{uri}");
    }

    Ok(())
}
