use http::{Method, StatusCode};

pub(crate) trait MethodExt {
    fn need_request_body(&self) -> bool;
    fn allow_response_body(&self) -> bool;
}

impl MethodExt for Method {
    fn need_request_body(&self) -> bool {
        matches!(*self, Method::POST | Method::PUT | Method::PATCH)
    }

    fn allow_response_body(&self) -> bool {
        *self != Method::HEAD
    }
}

pub(crate) trait HeaderIterExt {
    fn has(self, key: &str, value: &str) -> bool;
    fn has_key(self, key: &str) -> bool;
}

impl<'a, I> HeaderIterExt for I
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    fn has(self, key: &str, value: &str) -> bool {
        self.filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .any(|(_, v)| {
                v.split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case(value))
            })
    }

    fn has_key(mut self, key: &str) -> bool {
        self.any(|(k, _)| k.eq_ignore_ascii_case(key))
    }
}

pub(crate) trait StatusExt {
    /// Statuses that never carry a response body.
    fn body_not_allowed(&self) -> bool;
}

impl StatusExt for StatusCode {
    fn body_not_allowed(&self) -> bool {
        self.is_informational()
            || *self == StatusCode::NO_CONTENT
            || *self == StatusCode::NOT_MODIFIED
    }
}
