//! The generic line-oriented meta format shared by Tor directory documents.
//!
//! A document is a flat sequence of "items": a keyword, optional
//! whitespace-separated arguments, and zero or more PEM-style objects
//! trailing the item. Consensus relay entries (`r`/`s`/`w` lines) are
//! items in this sense; so are the signature blocks at the end of a
//! consensus, which this parser must be able to skip over without
//! understanding.

use std::fmt;

use super::error::DocumentParseError;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{alphanumeric1, line_ending, not_line_ending, space0, space1};
use nom::combinator::{map, opt, recognize};
use nom::multi::many0;
use nom::sequence::tuple;
use nom::Finish;
use nom::IResult;

/// An unspecific Tor document: just its items, in order.
#[derive(Debug)]
pub struct Document<'a> {
    pub items: Vec<Item<'a>>,
}

impl<'a> Document<'a> {
    /// Parse every item out of `text`, left to right, until input is
    /// exhausted.
    pub fn parse_single(text: &'a str) -> Result<Document<'a>, DocumentParseError> {
        let (i, items) = many0(Item::nom_parse)(text)
            .map_err(|e: nom::Err<nom::error::Error<&str>>| e.to_owned())
            .finish()?;

        if !i.is_empty() {
            return Err(DocumentParseError::remaining(text, i));
        }

        Ok(Document { items })
    }
}

/// A generic item within a Tor doc.
#[derive(Debug)]
pub struct Item<'a> {
    pub keyword: &'a str,
    pub arguments: Option<&'a str>,
    pub objects: Vec<Object<'a>>,
}

impl<'a> Item<'a> {
    fn nom_parse(i: &'a str) -> IResult<&str, Item<'a>> {
        // first line (keyword and, optionally, args)
        let (i, kw) = nom_parse_keyword(i)?;
        let (i, _) = space0(i)?;
        let (i, args) = opt(not_line_ending)(i)?;
        let (i, _) = line_ending(i)?;

        // get objects following the first line
        let (i, objs) = many0(Object::nom_parse)(i)?;

        Ok((
            i,
            Item {
                keyword: kw,
                arguments: args.filter(|s: &&str| !s.is_empty()),
                objects: objs,
            },
        ))
    }

    pub fn split_arguments(&self) -> Result<Vec<&str>, DocumentParseError> {
        self.arguments
            .ok_or_else(|| DocumentParseError::ItemArgumentsMissing {
                keyword: self.keyword.to_string(),
            })
            .map(|x| x.split(' ').filter(|s| !s.is_empty()).collect())
    }

    pub fn get_argument(&self) -> Result<&str, DocumentParseError> {
        self.arguments
            .ok_or_else(|| DocumentParseError::ItemArgumentsMissing {
                keyword: self.keyword.to_string(),
            })
    }
}

fn nom_parse_keyword(i: &str) -> IResult<&str, &str> {
    recognize(|i| {
        let (i, _) = alphanumeric1(i)?;
        let (i, _) = take_while(|c| char::is_alphanumeric(c) || c == '-')(i)?;
        Ok((i, ()))
    })(i)
}

/// A multi-line PEM-style object within a Tor document (e.g. a signature).
#[derive(Debug)]
pub struct Object<'a> {
    pub keyword: &'a str,
    pub lines: Vec<&'a str>,
}

impl<'a> Object<'a> {
    fn nom_parse(i: &'a str) -> IResult<&'a str, Object<'a>> {
        let (i, _) = tag("-----BEGIN ")(i)?;
        let (i, keyword) = recognize(many0(alt((alphanumeric1, space1))))(i)?;
        let (i, _) = tag("-----")(i)?;
        let (i, _) = line_ending(i)?;

        let line_or_end = |i: &'a str| -> IResult<&'a str, Option<&'a str>> {
            let (i, line) = alt((
                map(
                    tuple((tag("-----END "), tag(keyword), tag("-----"))),
                    |_| None,
                ),
                map(not_line_ending, Some),
            ))(i)?;
            let (i, _) = line_ending(i)?;
            Ok((i, line))
        };

        let mut lines = Vec::new();
        let (i, _) = {
            let mut i = i;
            loop {
                let (this_i, this_line) = line_or_end(i)?;
                i = this_i;
                match this_line {
                    Some(l) => lines.push(l),
                    None => break,
                }
            }
            (i, ())
        };

        Ok((i, Object { keyword, lines }))
    }
}

/// A relay fingerprint, stored as raw bytes so it can be rendered either
/// as the base64 the consensus carries or the hex used everywhere else in
/// this engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    blob: Vec<u8>,
}

impl Fingerprint {
    pub fn from_str_b64(raw_b64: &str) -> Result<Fingerprint, DocumentParseError> {
        Ok(Fingerprint {
            blob: base64::decode(raw_b64)?,
        })
    }

    pub fn from_str_hex(raw_hex: &str) -> Result<Fingerprint, DocumentParseError> {
        let mut blob = Vec::new();
        let mut raw_hex = raw_hex.trim_start_matches('$');
        while !raw_hex.is_empty() {
            raw_hex = raw_hex.trim_start();
            let byte = u8::from_str_radix(&raw_hex[..2], 16)?;
            blob.push(byte);
            raw_hex = &raw_hex[2..];
        }
        Ok(Fingerprint { blob })
    }

    pub fn to_string_hex(&self) -> String {
        format!("{}", self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in &self.blob {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_with_objects() {
        let doc = concat!(
            "directory-signature 0232AF901C31A04EE9848595AF9BB7620D4C5B2E 491466AA6B52156E455D9B545242C21D16A6880A\n",
            "-----BEGIN SIGNATURE-----\n",
            "PlYR25xXpuO75eQTnqUx/FX3ZDayW4Ciy5YwF0p0yEv/ApfkZfg6frfwILgm/U/c\n",
            "-----END SIGNATURE-----\n",
        );

        let (remaining, item) = Item::nom_parse(doc).unwrap();
        assert_eq!(remaining, "");
        assert_eq!(item.keyword, "directory-signature");
        assert_eq!(item.objects[0].keyword, "SIGNATURE");
    }

    #[test]
    fn test_fingerprint_hex_roundtrip() {
        let fp = Fingerprint::from_str_hex("$12FF0B42").unwrap();
        assert_eq!(fp.to_string_hex(), "12ff0b42");
    }
}
