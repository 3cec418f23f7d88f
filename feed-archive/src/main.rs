use feed_msg::Comment;
use feed_ref::ActorId;
use feed_store::{Config, Dump, Feed, MemoryRemote};
use feed_threads::count_nodes;
use log::{info, warn};
use std::{env, fs, io, path::PathBuf, rc::Rc};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
enum Error {
    #[error("No home directory, pass a dump path")]
    NoHomeDir,
    #[error("Failed to read {path}, cause: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse {path}, cause: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Dump has no actorId")]
    NoActor,
    #[error(transparent)]
    Feed(#[from] feed_store::Error),
}

fn default_dump_path() -> Result<PathBuf, Error> {
    let home = simple_home_dir::home_dir().ok_or(Error::NoHomeDir)?;
    Ok(home.join(".booking-feed").join("dump.json"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: PathBuf) -> Result<T, Error> {
    let text = fs::read_to_string(&path).map_err(|source| Error::Read {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| Error::Parse { path, source })
}

fn print_thread(comment: &Comment, depth: usize) {
    println!(
        "{}- {} ({}): {}",
        "  ".repeat(depth + 1),
        comment.author_id,
        comment.reaction_counts.total(),
        comment.content
    );
    for reply in &comment.replies {
        print_thread(reply, depth + 1);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = env::args().skip(1);
    let dump_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => default_dump_path()?,
    };
    let config: Config = match args.next() {
        Some(path) => read_json(PathBuf::from(path))?,
        None => Config::default(),
    };

    info!("reading {}", dump_path.display());
    let dump: Dump = read_json(dump_path)?;
    let actor: ActorId = dump.actor_id.clone().ok_or(Error::NoActor)?;

    let remote = Rc::new(MemoryRemote::from_dump(actor.clone(), dump));
    let feed = Feed::new(remote, actor, config);
    feed.load().await?;

    for post in feed.posts() {
        println!(
            "{} by {} at {} [{} reactions, {} comments]",
            post.id,
            post.author_id,
            post.created_at.to_rfc3339(),
            post.reaction_counts.total(),
            post.comments_count
        );
        println!("  {}", post.text);

        if let Err(err) = feed.load_comments(&post.id).await {
            warn!("skipping comments of {}: {}", post.id, err);
            continue;
        }
        let forest = feed.comment_forest(&post.id);
        for root in &forest {
            print_thread(root, 0);
        }
        info!("{}: {} comments in {} threads", post.id, count_nodes(&forest), forest.len());
    }

    println!("Done!");
    Ok(())
}
