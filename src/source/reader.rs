use crate::model::{Post, PostId};
use crate::source::SourceError;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

/// One dump line: either a flattened post or a raw status object
#[derive(Debug, Deserialize)]
struct DumpRecord {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    id_str: Option<String>,
    #[serde(default)]
    urls: Option<Vec<Option<String>>>,
    #[serde(default)]
    hashtags: Option<Vec<Option<String>>>,
    #[serde(default)]
    entities: Option<Entities>,
}

#[derive(Debug, Default, Deserialize)]
struct Entities {
    #[serde(default)]
    hashtags: Vec<HashtagEntity>,
    #[serde(default)]
    urls: Vec<UrlEntity>,
}

#[derive(Debug, Deserialize)]
struct HashtagEntity {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UrlEntity {
    #[serde(default)]
    expanded_url: Option<String>,
}

impl DumpRecord {
    fn into_post(self) -> Option<Post> {
        let id = match (self.id_str, self.id) {
            (Some(id), _) if !id.is_empty() => PostId::new(id),
            (_, Some(RawId::Number(id))) => PostId::from(id),
            (_, Some(RawId::Text(id))) if !id.is_empty() => PostId::new(id),
            _ => return None,
        };

        let entities = self.entities.unwrap_or_default();
        let urls = self.urls.unwrap_or_else(|| {
            entities
                .urls
                .into_iter()
                .map(|u| u.expanded_url)
                .collect()
        });
        let hashtags = self.hashtags.unwrap_or_else(|| {
            entities.hashtags.into_iter().map(|h| h.text).collect()
        });

        Some(Post::new(id, urls, hashtags))
    }
}

/// Decodes one dump line, `None` if it is not a usable post
pub fn parse_post_line(line: &str) -> Option<Post> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str::<DumpRecord>(line)
        .ok()
        .and_then(DumpRecord::into_post)
}

/// Iterator over the posts of one dump, skipping undecodable lines
pub struct PostReader<R> {
    lines: Lines<R>,
    line_number: usize,
    posts: usize,
    skipped: usize,
    source: String,
}

impl<R: BufRead> PostReader<R> {
    pub fn new(reader: R, source: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            posts: 0,
            skipped: 0,
            source: source.into(),
        }
    }

    /// Number of lines that could not be decoded so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of posts yielded so far
    pub fn posts(&self) -> usize {
        self.posts
    }
}

impl<R: BufRead> Iterator for PostReader<R> {
    type Item = Post;

    fn next(&mut self) -> Option<Post> {
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    // an unreadable line ends the file
                    debug!(source = %self.source, line = self.line_number + 1, error = %e, "Read error");
                    self.skipped += 1;
                    return None;
                }
                None => {
                    info!(
                        source = %self.source,
                        posts = self.posts,
                        skipped = self.skipped,
                        "Finished reading dump"
                    );
                    return None;
                }
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            match parse_post_line(&line) {
                Some(post) => {
                    self.posts += 1;
                    return Some(post);
                }
                None => {
                    debug!(source = %self.source, line = self.line_number, "Skipping undecodable line");
                    self.skipped += 1;
                }
            }
        }
    }
}

/// Opens a dump file for reading
pub fn open_dump(path: &Path) -> Result<PostReader<BufReader<File>>, SourceError> {
    let file = File::open(path)?;
    Ok(PostReader::new(
        BufReader::new(file),
        path.display().to_string(),
    ))
}
