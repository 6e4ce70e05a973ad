/// SQL schema for the tweetbase store
/// Creates all tables with proper constraints, foreign keys, and indexes
pub const SCHEMA: &str = r#"
-- Users table (name is write-once and deliberately not unique)
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name TEXT
);

CREATE INDEX IF NOT EXISTS idx_users_name ON users(name);

-- Posts table
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY,
    author_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    reply_to_user_id INTEGER,
    -- stored without a foreign key: the replied-to post is usually not collected
    reply_to_post_id INTEGER,
    repost_of INTEGER,
    FOREIGN KEY (author_id) REFERENCES users(id),
    FOREIGN KEY (reply_to_user_id) REFERENCES users(id),
    FOREIGN KEY (repost_of) REFERENCES posts(id)
);

CREATE INDEX IF NOT EXISTS idx_posts_author_id ON posts(author_id);
CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
CREATE INDEX IF NOT EXISTS idx_posts_reply_to_user_id ON posts(reply_to_user_id);
CREATE INDEX IF NOT EXISTS idx_posts_reply_to_post_id ON posts(reply_to_post_id);
CREATE INDEX IF NOT EXISTS idx_posts_repost_of ON posts(repost_of);

-- Hashtags table (case-folded text is the key)
CREATE TABLE IF NOT EXISTS hashtags (
    tag TEXT PRIMARY KEY
);

-- URLs table (case-folded expanded url is the key)
CREATE TABLE IF NOT EXISTS urls (
    url TEXT PRIMARY KEY
);

-- Post-hashtag junction table
CREATE TABLE IF NOT EXISTS post_hashtags (
    post_id INTEGER NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (post_id, tag),
    FOREIGN KEY (post_id) REFERENCES posts(id),
    FOREIGN KEY (tag) REFERENCES hashtags(tag)
);

CREATE INDEX IF NOT EXISTS idx_post_hashtags_tag ON post_hashtags(tag);

-- Post-url junction table
CREATE TABLE IF NOT EXISTS post_urls (
    post_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    PRIMARY KEY (post_id, url),
    FOREIGN KEY (post_id) REFERENCES posts(id),
    FOREIGN KEY (url) REFERENCES urls(url)
);

CREATE INDEX IF NOT EXISTS idx_post_urls_url ON post_urls(url);

-- Post-user mention junction table
CREATE TABLE IF NOT EXISTS post_mentions (
    post_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    PRIMARY KEY (post_id, user_id),
    FOREIGN KEY (post_id) REFERENCES posts(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_post_mentions_user_id ON post_mentions(user_id);
"#;

/// Tables created by [`SCHEMA`], base tables first
pub const TABLES: [&str; 7] = [
    "users",
    "posts",
    "hashtags",
    "urls",
    "post_hashtags",
    "post_urls",
    "post_mentions",
];
