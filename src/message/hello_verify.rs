use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

use crate::buffer::Buf;
use crate::cookie::Cookie;
use crate::message::ProtocolVersion;

#[derive(Debug, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub cookie: Cookie,
}

impl HelloVerifyRequest {
    pub fn new(cookie: Cookie) -> Self {
        HelloVerifyRequest { cookie }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let original = input;
        let (input, _) = ProtocolVersion::parse(input)?;
        let (input, cookie_len) = be_u8(input)?;
        let (input, cookie) = take(cookie_len as usize)(input)?;
        let cookie = Cookie::try_new(cookie).ok_or_else(|| {
            nom::Err::Failure(nom::error::Error::new(
                original,
                nom::error::ErrorKind::LengthValue,
            ))
        })?;

        Ok((input, HelloVerifyRequest { cookie }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        ProtocolVersion.serialize(output);
        output.push(self.cookie.len() as u8);
        output.extend_from_slice(&self.cookie);
    }
}
