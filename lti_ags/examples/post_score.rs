use aliri::jwt;
use clap::Parser;
use lti_ags::{AgsClient, ClientCredentialsConfig, ClientId, DeploymentId, StudentAttempt};
use url::Url;

#[derive(Debug, Parser)]
struct Opts {
    /// The platform issuer
    #[arg(long, env)]
    issuer: jwt::Issuer,

    /// The client ID registered for the tool
    #[arg(short, long, env)]
    client_id: ClientId,

    /// The deployment ID of the tool
    #[arg(short, long, env)]
    deployment_id: DeploymentId,

    /// The platform's OAuth2 token endpoint
    #[arg(short = 't', long, env)]
    auth_server_url: Url,

    /// The ID of the key used to sign client assertions
    #[arg(short, long, env, default_value = "1")]
    key_id: String,

    /// A PEM file holding the tool's RSA private key
    #[arg(short = 'p', long, env, default_value = "private_key.pem")]
    private_key_file: std::path::PathBuf,

    /// The resource link the grade belongs to
    #[arg(long, env)]
    resource_link_id: String,

    /// The platform's identifier for the learner
    #[arg(short, long, env)]
    user_id: String,

    /// The grade outcome URL provided at launch
    #[arg(short, long, env)]
    grade_outcome_url: Url,

    /// The tool's identifier for the graded resource
    #[arg(long, env)]
    resource_id: String,

    /// The tool's name for the graded resource
    #[arg(long, env)]
    resource_name: String,

    /// The score earned
    #[arg(long, env)]
    points_earned: f64,

    /// The maximum possible score
    #[arg(long, env)]
    points_available: f64,

    /// Report the attempt as still in progress
    #[arg(long, env)]
    incomplete: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let private_key = std::fs::read_to_string(&opts.private_key_file)?;

    let config = ClientCredentialsConfig::new(
        opts.issuer,
        opts.client_id,
        opts.deployment_id,
        opts.auth_server_url,
        private_key,
    )
    .with_key_id(opts.key_id);

    let client = AgsClient::new(&config)?;

    let attempt = StudentAttempt {
        points_earned: opts.points_earned,
        points_available: opts.points_available,
        complete: !opts.incomplete,
        grade_outcome_url: opts.grade_outcome_url,
        resource_id: opts.resource_id,
        resource_name: opts.resource_name,
    };

    let outcome = client
        .post_score(&opts.resource_link_id, &attempt, &opts.user_id)
        .await?;

    match outcome.updated_score_url {
        Some(score_url) => tracing::info!(
            status = outcome.status.as_u16(),
            %score_url,
            "score recorded at a new endpoint; use it for future passbacks"
        ),
        None => tracing::info!(status = outcome.status.as_u16(), "score recorded"),
    }

    Ok(())
}
