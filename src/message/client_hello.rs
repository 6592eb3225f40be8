use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

use crate::buffer::Buf;
use crate::cookie::{Cookie, COOKIE_LEN};

/// ClientHello body as seen by the coordinator.
///
/// The cookie field is ours. Everything after it belongs to the record layer.
#[derive(Debug, PartialEq, Eq)]
pub struct ClientHello<'a> {
    pub cookie: Cookie,
    pub payload: &'a [u8],
}

impl<'a> ClientHello<'a> {
    pub fn new(cookie: Cookie, payload: &'a [u8]) -> Self {
        ClientHello { cookie, payload }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ClientHello<'a>> {
        let original = input;
        let (input, cookie_len) = be_u8(input)?;
        if cookie_len as usize > COOKIE_LEN {
            return Err(nom::Err::Failure(nom::error::Error::new(
                original,
                nom::error::ErrorKind::LengthValue,
            )));
        }
        let (input, cookie) = take(cookie_len as usize)(input)?;
        let cookie = Cookie::try_new(cookie).ok_or_else(|| {
            nom::Err::Failure(nom::error::Error::new(
                original,
                nom::error::ErrorKind::LengthValue,
            ))
        })?;

        // Remaining bytes are opaque.
        let (payload, rest) = input.split_at(input.len());
        Ok((rest, ClientHello { cookie, payload }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.cookie.len() as u8);
        output.extend_from_slice(&self.cookie);
        output.extend_from_slice(self.payload);
    }
}
