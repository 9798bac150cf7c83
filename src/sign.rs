//! Request signing hook.

use crate::request::RequestFacade;

/// Adds authorization to a request right before it is committed.
///
/// Called once per exchange, after the body is in place, so implementations
/// can sign over `Content-MD5` and the other headers. Credentials are the
/// implementor's concern.
pub trait Authorizer {
    /// Add or modify headers on `request`.
    fn authorize(&self, request: &mut RequestFacade);
}

impl<F> Authorizer for F
where
    F: Fn(&mut RequestFacade),
{
    fn authorize(&self, request: &mut RequestFacade) {
        self(request)
    }
}

/// Sets one fixed header, such as a bearer token.
#[derive(Debug, Clone)]
pub struct StaticHeader {
    name: String,
    value: String,
}

impl StaticHeader {
    /// Authorizer adding `name: value`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        StaticHeader {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Authorizer for StaticHeader {
    fn authorize(&self, request: &mut RequestFacade) {
        request.put_header(self.name.clone(), self.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Target;
    use crate::test::ScriptedTransport;
    use std::rc::Rc;

    #[test]
    fn closure_and_static() {
        let transport = Rc::new(ScriptedTransport::new());
        let mut req = RequestFacade::new(transport, Target::http("s3.test"));

        let sign = |r: &mut RequestFacade| {
            let line = format!("{} {}", r.method(), r.path());
            r.put_header("Authorization", format!("TEST {}", line));
        };
        sign.authorize(&mut req);
        StaticHeader::new("x-amz-security-token", "tok").authorize(&mut req);

        let headers: Vec<_> = req.headers().collect();
        assert_eq!(
            headers,
            vec![("Authorization", "TEST GET /"), ("x-amz-security-token", "tok")]
        );
    }
}
