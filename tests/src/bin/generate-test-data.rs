use std::io::Write;

use anyhow::Context;
use chrono::{Duration, SecondsFormat, Utc};
use rand::{seq::SliceRandom, Rng};
use sage_api::{ReactionKind, Time, Uuid, MAX_CONTENT_LEN};

const NUM_USERS: usize = 12;
const NUM_POSTS: usize = 6;
const NUM_TOP_LEVEL: usize = 80;
const NUM_REPLIES: usize = 200;
const NUM_LIKES: usize = 400;
const NUM_REACTIONS: usize = 60;
const NUM_SUBSCRIPTIONS: usize = 25;

const COMMENT_WORD_COUNT: usize = 30;

/// Percentage of rows generated already soft-deleted
const DELETED_PERCENT: u32 = 5;

#[derive(structopt::StructOpt)]
struct Opt {
    /// Seed for the random generator, for reproducible data sets
    #[structopt(long)]
    seed: Option<u64>,
}

struct Gen<R> {
    rng: R,
    out: std::io::BufWriter<std::io::Stdout>,
}

fn sql_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn sql_time(t: Time) -> String {
    sql_str(&t.to_rfc3339_opts(SecondsFormat::Micros, true))
}

impl<R: Rng> Gen<R> {
    fn items(&mut self, table: &str, columns: &str, rows: Vec<String>) -> anyhow::Result<()> {
        writeln!(self.out, "INSERT INTO {table} ({columns}) VALUES")?;
        for (i, r) in rows.iter().enumerate() {
            let sep = if i + 1 == rows.len() { "" } else { "," };
            writeln!(self.out, "    ({r}){sep}")?;
        }
        writeln!(self.out, "ON CONFLICT DO NOTHING;")?;
        writeln!(self.out)?;
        Ok(())
    }

    fn deleted(&mut self) -> bool {
        self.rng.gen_ratio(DELETED_PERCENT, 100)
    }

    fn time_after(&mut self, t: Time) -> Time {
        t + Duration::seconds(self.rng.gen_range(1..3 * 24 * 3600))
    }

    fn comment_text(&mut self) -> String {
        let words = self.rng.gen_range(3..COMMENT_WORD_COUNT);
        let mut text = lipsum::lipsum_words_with_rng(&mut self.rng, words);
        text.truncate(MAX_CONTENT_LEN);
        text
    }
}

fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();
    let rng = match opt.seed {
        Some(s) => <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(s),
        None => <rand::rngs::StdRng as rand::SeedableRng>::from_entropy(),
    };
    let mut g = Gen {
        rng,
        out: std::io::BufWriter::new(std::io::stdout()),
    };
    let start = Utc::now() - Duration::days(60);

    let users = (0..NUM_USERS).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    let rows = users
        .iter()
        .enumerate()
        .map(|(i, u)| {
            // some users never filled in their profile
            let name = match i % 4 {
                0 => String::from("NULL"),
                _ => sql_str(&lipsum::lipsum_title_with_rng(&mut g.rng)),
            };
            format!("'{u}', {name}, 'https://cdn.example/avatars/{u}.png'")
        })
        .collect();
    g.items("user_profiles", "id, display_name, avatar_url", rows)?;

    let posts = (0..NUM_POSTS)
        .map(|i| format!("feature-{i}"))
        .collect::<Vec<_>>();

    // (id, post, created_at), so that replies stay in their parent's post
    let mut comments: Vec<(Uuid, String, Time)> = Vec::new();
    let mut rows = Vec::new();
    for i in 0..NUM_TOP_LEVEL + NUM_REPLIES {
        let id = Uuid::new_v4();
        let user = *users.choose(&mut g.rng).context("no users")?;
        let (post, parent, created_at) = match i < NUM_TOP_LEVEL {
            true => {
                let post = posts.choose(&mut g.rng).context("no posts")?.clone();
                let at = start + Duration::seconds(g.rng.gen_range(0..30 * 24 * 3600));
                (post, None, at)
            }
            false => {
                let (parent, post, at) = comments.choose(&mut g.rng).context("no comments")?.clone();
                let at = g.time_after(at);
                (post, Some(parent), at)
            }
        };
        let text = g.comment_text();
        let deleted = g.deleted();
        rows.push(format!(
            "'{id}', {}, {}, '{user}', {}, {}, {}, {deleted}",
            sql_str(&post),
            parent.map(|p| format!("'{p}'")).unwrap_or_else(|| String::from("NULL")),
            sql_str(&text),
            sql_time(created_at),
            sql_time(created_at),
        ));
        comments.push((id, post, created_at));
    }
    g.items(
        "comments",
        "id, post_id, parent_id, user_id, content, created_at, updated_at, is_deleted",
        rows,
    )?;

    // at most one active like per pair
    let mut liked = std::collections::HashSet::new();
    let mut rows = Vec::new();
    for _ in 0..NUM_LIKES {
        let (comment, _, at) = comments.choose(&mut g.rng).context("no comments")?.clone();
        let user = *users.choose(&mut g.rng).context("no users")?;
        let deleted = g.deleted() || !liked.insert((comment, user));
        let at = g.time_after(at);
        rows.push(format!(
            "'{}', '{comment}', '{user}', {deleted}, {}, {}",
            Uuid::new_v4(),
            sql_time(at),
            sql_time(at),
        ));
    }
    g.items(
        "comment_likes",
        "id, comment_id, user_id, is_deleted, created_at, updated_at",
        rows,
    )?;

    let mut reacted = std::collections::HashSet::new();
    let mut rows = Vec::new();
    for _ in 0..NUM_REACTIONS {
        let post = posts.choose(&mut g.rng).context("no posts")?.clone();
        let user = *users.choose(&mut g.rng).context("no users")?;
        let kind = ReactionKind::ALL.choose(&mut g.rng).context("no reaction kinds")?;
        let deleted = g.deleted() || !reacted.insert((post.clone(), user));
        let at = g.time_after(start);
        rows.push(format!(
            "'{}', {}, '{user}', '{}', {deleted}, {}, {}",
            Uuid::new_v4(),
            sql_str(&post),
            kind.name(),
            sql_time(at),
            sql_time(at),
        ));
    }
    g.items(
        "feature_reactions",
        "id, feature_id, user_id, reaction_type, is_deleted, created_at, updated_at",
        rows,
    )?;

    let mut rows = Vec::new();
    for i in 0..NUM_SUBSCRIPTIONS {
        let subscribed_at = g.time_after(start);
        let unsubscribed_at = match g.rng.gen_ratio(1, 5) {
            true => sql_time(g.time_after(subscribed_at)),
            false => String::from("NULL"),
        };
        let user = match users.get(i) {
            Some(u) if g.rng.gen() => format!("'{u}'"),
            _ => String::from("NULL"),
        };
        rows.push(format!(
            "'{}', 'reader{i}@example.com', {user}, {}, {}, {unsubscribed_at}",
            Uuid::new_v4(),
            unsubscribed_at == "NULL",
            sql_time(subscribed_at),
        ));
    }
    g.items(
        "email_subscriptions",
        "id, email, user_id, is_subscribed, subscribed_at, unsubscribed_at",
        rows,
    )?;

    g.out.flush().context("flushing generated data")?;
    Ok(())
}
