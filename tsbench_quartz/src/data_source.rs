//! Decoder for the generator's line-oriented file format.
//!
//! The input begins with a header block: a `tags` line naming each tag
//! column and its serialized type, then one line per metric table naming
//! its field columns, terminated by a blank line. After the header, each
//! point is a pair of lines — a `tags` line carrying the full tag set,
//! then a `<table>,<timestamp>,<values...>` row line:
//!
//! ```text
//! tags,hostname string,region string
//! cpu,usage_user,usage_system
//!
//! tags,hostname=host_0,region=eu-west-1
//! cpu,1451606400000000000,58,2
//! ```

use std::{
    fmt,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use tsbench_data::{Headers, Point};
use tsbench_targets::{DataSource, Error, Result};

/// Prefix of the header's first line and of every point's tag line.
const TAGS_PREFIX: &str = "tags";

/// Streaming [`DataSource`] over any buffered reader.
pub struct FileDataSource<R> {
    reader: R,
    headers: Option<Headers>,
    line: String,
}

impl<R> fmt::Debug for FileDataSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDataSource")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl FileDataSource<Box<dyn BufRead + Send>> {
    /// Read from `path`, or from stdin when no path is given.
    pub fn open(file: Option<&Path>) -> Result<Self> {
        let reader: Box<dyn BufRead + Send> = match file {
            Some(path) => Box::new(BufReader::new(File::open(path)?)),
            None => Box::new(BufReader::new(io::stdin())),
        };
        Ok(Self::new(reader))
    }
}

impl<R: BufRead> FileDataSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            headers: None,
            line: String::new(),
        }
    }

    /// The next line with its trailing newline removed, or `None` at EOF.
    fn read_line(&mut self) -> Result<Option<&str>> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.trim_end_matches(['\r', '\n'])))
    }

    fn parse_header_block(&mut self) -> Result<Headers> {
        let Some(line) = self.read_line()? else {
            return Err(Error::parse("empty input, missing header block"));
        };
        let mut parts = line.split(',');
        if parts.next() != Some(TAGS_PREFIX) {
            return Err(Error::parse(format!(
                "header must begin with a tag line, got {line:?}"
            )));
        }

        let mut tag_keys = Vec::new();
        let mut tag_types = Vec::new();
        for spec in parts {
            let Some((name, serialized_type)) = spec.split_once(' ') else {
                return Err(Error::parse(format!("tag column without a type: {spec:?}")));
            };
            tag_keys.push(name.to_string());
            tag_types.push(serialized_type.to_string());
        }

        let mut headers = Headers {
            tag_keys,
            tag_types,
            ..Default::default()
        };
        loop {
            let Some(line) = self.read_line()? else {
                return Err(Error::parse("unexpected end of input in header block"));
            };
            if line.is_empty() {
                break;
            }
            let (table, fields) = match line.split_once(',') {
                Some((table, rest)) => (table, rest.split(',').map(str::to_string).collect()),
                None => (line, Vec::new()),
            };
            if headers
                .field_keys
                .insert(table.to_string(), fields)
                .is_some()
            {
                return Err(Error::parse(format!("duplicate table in header: {table}")));
            }
        }
        Ok(headers)
    }
}

impl<R: BufRead + Send> DataSource for FileDataSource<R> {
    fn headers(&mut self) -> Result<&Headers> {
        let headers = match self.headers.take() {
            Some(headers) => headers,
            None => self.parse_header_block()?,
        };
        Ok(self.headers.insert(headers))
    }

    fn next_point(&mut self) -> Result<Option<Point>> {
        if self.headers.is_none() {
            self.headers()?;
        }

        let Some(line) = self.read_line()? else {
            return Ok(None);
        };
        // A trailing blank line after the last pair also ends the stream.
        if line.is_empty() {
            return Ok(None);
        }
        let tags = match line.split_once(',') {
            Some((TAGS_PREFIX, tags)) => tags.to_string(),
            _ => {
                return Err(Error::parse(format!("expected a tag line, got {line:?}")));
            }
        };

        let Some(line) = self.read_line()? else {
            return Err(Error::parse("tag line without a row line at end of input"));
        };
        let Some((table, fields)) = line.split_once(',') else {
            return Err(Error::parse(format!("malformed row line: {line:?}")));
        };
        Ok(Some(Point::new(table, tags, fields)))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = "\
tags,hostname string,region string
cpu,usage_user,usage_system
mem,used,available

tags,hostname=host_0,region=eu-west-1
cpu,1451606400000000000,58,2
tags,hostname=host_1,region=us-east-1
mem,1451606400000000000,97,3
";

    fn source(input: &str) -> FileDataSource<Cursor<Vec<u8>>> {
        FileDataSource::new(Cursor::new(input.as_bytes().to_vec()))
    }

    #[test]
    fn parses_header_block() {
        let mut source = source(SAMPLE);
        let headers = source.headers().unwrap();

        assert_eq!(headers.tag_keys, ["hostname", "region"]);
        assert_eq!(headers.tag_types, ["string", "string"]);
        assert_eq!(headers.field_keys.len(), 2);
        assert_eq!(
            headers.field_keys["cpu"],
            ["usage_user", "usage_system"]
        );
        assert_eq!(headers.field_keys["mem"], ["used", "available"]);
    }

    #[test]
    fn headers_are_cached() {
        let mut source = source(SAMPLE);
        source.headers().unwrap();
        // A second call must not consume further input.
        source.headers().unwrap();

        let point = source.next_point().unwrap().unwrap();
        assert_eq!(point.table, "cpu");
    }

    #[test]
    fn yields_points_until_eof() {
        let mut source = source(SAMPLE);
        source.headers().unwrap();

        let first = source.next_point().unwrap().unwrap();
        assert_eq!(first.table, "cpu");
        assert_eq!(first.row.tags, "hostname=host_0,region=eu-west-1");
        assert_eq!(first.row.fields, "1451606400000000000,58,2");

        let second = source.next_point().unwrap().unwrap();
        assert_eq!(second.table, "mem");
        assert_eq!(second.row.tags, "hostname=host_1,region=us-east-1");
        assert_eq!(second.row.fields, "1451606400000000000,97,3");

        assert_eq!(source.next_point().unwrap(), None);
        assert_eq!(source.next_point().unwrap(), None);
    }

    #[test]
    fn next_point_parses_headers_lazily() {
        let mut source = source(SAMPLE);
        let point = source.next_point().unwrap().unwrap();
        assert_eq!(point.table, "cpu");
    }

    #[test]
    fn empty_input_is_parse_error() {
        let mut source = source("");
        assert_matches!(source.headers(), Err(Error::Parse { .. }));
    }

    #[test]
    fn header_without_tags_prefix_is_parse_error() {
        let mut source = source("hosts,hostname string\ncpu,usage_user\n\n");
        assert_matches!(
            source.headers(),
            Err(Error::Parse { message }) if message.contains("tag line")
        );
    }

    #[test]
    fn tag_column_without_type_is_parse_error() {
        let mut source = source("tags,hostname\ncpu,usage_user\n\n");
        assert_matches!(
            source.headers(),
            Err(Error::Parse { message }) if message.contains("without a type")
        );
    }

    #[test]
    fn truncated_header_is_parse_error() {
        let mut source = source("tags,hostname string\ncpu,usage_user\n");
        assert_matches!(source.headers(), Err(Error::Parse { .. }));
    }

    #[test]
    fn duplicate_header_table_is_parse_error() {
        let mut source = source("tags,hostname string\ncpu,a\ncpu,b\n\n");
        assert_matches!(
            source.headers(),
            Err(Error::Parse { message }) if message.contains("duplicate")
        );
    }

    #[test]
    fn point_without_tag_line_is_parse_error() {
        let input = "tags,hostname string\ncpu,usage_user\n\ncpu,1451606400000000000,58\n";
        let mut source = source(input);
        assert_matches!(
            source.next_point(),
            Err(Error::Parse { message }) if message.contains("expected a tag line")
        );
    }

    #[test]
    fn dangling_tag_line_is_parse_error() {
        let input = "tags,hostname string\ncpu,usage_user\n\ntags,hostname=host_0\n";
        let mut source = source(input);
        assert_matches!(
            source.next_point(),
            Err(Error::Parse { message }) if message.contains("without a row line")
        );
    }

    #[test]
    fn trailing_blank_line_ends_stream() {
        let input = "tags,hostname string\ncpu,usage_user\n\n\
                     tags,hostname=host_0\ncpu,1451606400000000000,58\n\n";
        let mut source = source(input);
        source.next_point().unwrap().unwrap();
        assert_eq!(source.next_point().unwrap(), None);
    }
}
