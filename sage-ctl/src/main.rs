use std::sync::Arc;

use anyhow::{anyhow, Context};
use sage_api::{AuthProvider, AuthToken, CommentId, Page, PostId, ReactionKind, UserId};
use sage_client::{CommentNode, Gateway, SessionManager};

mod rest;
use rest::{Endpoint, RestAuth, RestStore};

#[derive(structopt::StructOpt)]
struct Opt {
    /// Base URL of the hosted store
    #[structopt(short, long, env = "SAGE_URL")]
    host: String,

    /// Public API key of the project
    #[structopt(long, env = "SAGE_ANON_KEY", hide_env_values = true)]
    anon_key: String,

    /// Access token of an existing session
    #[structopt(long, env = "SAGE_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[structopt(long, env = "SAGE_EMAIL")]
    email: Option<String>,

    #[structopt(long, env = "SAGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Print errors as JSON
    #[structopt(long)]
    json: bool,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Sign in and print the access token
    Login,

    /// Show the comments of a post
    Comments {
        post: String,

        #[structopt(long, default_value = "20")]
        limit: usize,

        #[structopt(long, default_value = "0")]
        offset: usize,

        /// Only show top-level comments
        #[structopt(long)]
        flat: bool,
    },

    /// Comment on a post
    Post { post: String, content: String },

    /// Reply to a comment
    Reply {
        post: String,
        parent: String,
        content: String,
    },

    /// Like or unlike a comment
    Like { comment: String },

    /// Edit one of your comments
    Edit { comment: String, content: String },

    /// Delete one of your comments
    Delete { comment: String },

    /// React to a feature post, by name (fire) or emoji (🔥)
    React { feature: String, kind: ReactionKind },

    /// Remove your reaction to a feature post
    Unreact { feature: String },

    /// Show the reactions to a feature post
    Reactions { feature: String },

    /// Subscribe an email address to the newsletter
    Subscribe { email: String },

    /// Unsubscribe an email address from the newsletter
    Unsubscribe { email: String },
}

type Sessions = SessionManager<Arc<RestAuth>, Arc<RestStore>>;

struct Ctx {
    store: Arc<RestStore>,
    gateway: Gateway<Arc<RestStore>>,
    sessions: Sessions,
    email: Option<String>,
    password: Option<String>,
}

impl Ctx {
    /// Signs in with the configured credentials, or picks up the configured
    /// token
    async fn viewer(&self) -> anyhow::Result<UserId> {
        let user = match (&self.email, &self.password) {
            (Some(email), Some(password)) => Some(self.sessions.sign_in(email, password).await?),
            _ => self.sessions.init().await?,
        };
        let user = user.ok_or_else(|| {
            anyhow!("not signed in, set SAGE_ACCESS_TOKEN or SAGE_EMAIL and SAGE_PASSWORD")
        })?;
        self.store.set_token(Some(user.session.access_token.clone()));
        tracing::debug!(user = %user.profile.id, display_name = user.profile.display_name(), "acting as");
        Ok(user.profile.id)
    }

    /// Viewer if there is one, anonymous otherwise
    async fn maybe_viewer(&self) -> anyhow::Result<Option<UserId>> {
        match (&self.email, &self.password, self.sessions.auth().current_session().await?) {
            (None, None, None) => Ok(None),
            _ => Ok(Some(self.viewer().await?)),
        }
    }

    /// Fails unless the viewer wrote the comment
    async fn owned_comment(&self, id: &CommentId) -> anyhow::Result<UserId> {
        let viewer = self.viewer().await?;
        let comment = self
            .gateway
            .fetch_comment(id)
            .await?
            .ok_or_else(|| sage_api::Error::UnknownComment(id.clone()))?;
        if comment.user_id != viewer {
            return Err(sage_api::Error::PermissionDenied.into());
        }
        Ok(viewer)
    }
}

fn print_tree(nodes: &[CommentNode], depth: usize) {
    for n in nodes {
        println!(
            "{:indent$}{} ({}) {}: {} [{} likes{}, {} replies]",
            "",
            n.created_at.format("%Y-%m-%d %H:%M"),
            n.id,
            n.author.display_name,
            n.content,
            n.like_count,
            if n.is_hearted { ", liked" } else { "" },
            n.reply_count,
            indent = depth * 2,
        );
        print_tree(&n.replies, depth + 1);
    }
}

async fn run(opt: Opt) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let endpoint = Endpoint {
        host: opt.host,
        anon_key: opt.anon_key,
    };
    let store = Arc::new(RestStore::new(client.clone(), endpoint.clone()));
    let auth = Arc::new(RestAuth::new(client, endpoint, opt.token.map(AuthToken)));
    let ctx = Ctx {
        gateway: Gateway::new(store.clone()),
        sessions: SessionManager::new(auth, Gateway::new(store.clone())),
        store,
        email: opt.email,
        password: opt.password,
    };

    match opt.cmd {
        Command::Login => {
            ctx.viewer().await?;
            let user = ctx.sessions.current_user().context("sign-in did not stick")?;
            println!("{}", user.session.access_token.0);
        }
        Command::Comments {
            post,
            limit,
            offset,
            flat,
        } => {
            let viewer = ctx.maybe_viewer().await?;
            let page = ctx
                .gateway
                .fetch_comments(&PostId::new(post), viewer.as_ref(), !flat, Page { offset, limit })
                .await?;
            print_tree(&page.comments, 0);
            println!(
                "{} of {} top-level comments{}",
                page.comments.len(),
                page.total_top_level,
                match page.next_page {
                    Some(p) => format!(", next page at --offset {}", p.offset),
                    None => String::new(),
                }
            );
        }
        Command::Post { post, content } => {
            let viewer = ctx.viewer().await?;
            let c = ctx
                .gateway
                .create_comment(&viewer, &PostId::new(post), None, &content)
                .await?;
            println!("{}", c.id);
        }
        Command::Reply {
            post,
            parent,
            content,
        } => {
            let viewer = ctx.viewer().await?;
            let c = ctx
                .gateway
                .create_comment(
                    &viewer,
                    &PostId::new(post),
                    Some(&CommentId::new(parent)),
                    &content,
                )
                .await?;
            println!("{}", c.id);
        }
        Command::Like { comment } => {
            let viewer = ctx.viewer().await?;
            let liked = ctx.gateway.toggle_like(&CommentId::new(comment), &viewer).await?;
            println!("{}", if liked { "liked" } else { "unliked" });
        }
        Command::Edit { comment, content } => {
            let id = CommentId::new(comment);
            ctx.owned_comment(&id).await?;
            ctx.gateway.update_comment(&id, &content).await?;
        }
        Command::Delete { comment } => {
            let id = CommentId::new(comment);
            ctx.owned_comment(&id).await?;
            ctx.gateway.delete_comment(&id).await?;
        }
        Command::React { feature, kind } => {
            let viewer = ctx.viewer().await?;
            ctx.gateway
                .set_reaction(&PostId::new(feature), &viewer, kind)
                .await?;
        }
        Command::Unreact { feature } => {
            let viewer = ctx.viewer().await?;
            if !ctx.gateway.remove_reaction(&PostId::new(feature), &viewer).await? {
                println!("no reaction to remove");
            }
        }
        Command::Reactions { feature } => {
            let viewer = ctx.maybe_viewer().await?;
            let summary = ctx
                .gateway
                .reaction_summary(&PostId::new(feature), viewer.as_ref())
                .await?;
            for (kind, count) in &summary.counts {
                let mine = if summary.viewer_reaction == Some(*kind) { " (yours)" } else { "" };
                println!("{} {} {count}{mine}", kind.emoji(), kind.name());
            }
            println!("{} reactions", summary.total());
        }
        Command::Subscribe { email } => {
            let viewer = ctx.maybe_viewer().await?;
            let outcome = ctx.gateway.subscribe_email(&email, viewer.as_ref()).await?;
            println!("{outcome:?}");
        }
        Command::Unsubscribe { email } => {
            if !ctx.gateway.unsubscribe_email(&email).await? {
                println!("{email} was not subscribed");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let json = opt.json;
    match run(opt).await {
        Err(e) if json => {
            let contents = match e.downcast_ref::<sage_api::Error>() {
                Some(e) => e.contents(),
                None => serde_json::json!({ "message": format!("{e:#}"), "type": "unknown" }),
            };
            println!("{contents}");
            std::process::exit(1);
        }
        res => res,
    }
}
