/// What a completed request tells the shedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The service handled the request: record its latency as evidence of capacity.
    Pass,
    /// A server side failure: release the slot without recording anything.
    Fail,
}

/// Decides whether the result of an admitted request counts as a pass or a fail.
///
/// Only server side failures should fail: a client error still shows that the service
/// had the capacity to answer.
pub trait Classify<T, E> {
    fn classify(&self, result: &Result<T, E>) -> Outcome;
}

impl<F, T, E> Classify<T, E> for F
where
    F: Fn(&Result<T, E>) -> Outcome,
{
    fn classify(&self, result: &Result<T, E>) -> Outcome {
        self(result)
    }
}

/// Fails every `Err`, passes every `Ok`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl<T, E> Classify<T, E> for ErrorClassifier {
    #[inline]
    fn classify(&self, result: &Result<T, E>) -> Outcome {
        match result {
            Ok(_) => Outcome::Pass,
            Err(_) => Outcome::Fail,
        }
    }
}

/// Fails every `Err` and every response with a 5xx (or higher) status.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpStatusClassifier;

#[cfg(feature = "http")]
impl<B, E> Classify<http::Response<B>, E> for HttpStatusClassifier {
    fn classify(&self, result: &Result<http::Response<B>, E>) -> Outcome {
        match result {
            Ok(response) if response.status().as_u16() < 500 => Outcome::Pass,
            _ => Outcome::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_fail() {
        let ok: Result<u8, &str> = Ok(1);
        let err: Result<u8, &str> = Err("boom");
        assert_eq!(ErrorClassifier.classify(&ok), Outcome::Pass);
        assert_eq!(ErrorClassifier.classify(&err), Outcome::Fail);
    }

    #[test]
    fn closures_classify() {
        let odd_fails = |result: &Result<u8, ()>| match result {
            Ok(n) if n % 2 == 0 => Outcome::Pass,
            _ => Outcome::Fail,
        };
        assert_eq!(odd_fails.classify(&Ok(2)), Outcome::Pass);
        assert_eq!(odd_fails.classify(&Ok(3)), Outcome::Fail);
    }

    #[cfg(feature = "http")]
    #[test]
    fn server_errors_fail() {
        use http::Response;
        use http::StatusCode;

        let respond = |status: StatusCode| -> Result<Response<()>, ()> {
            let mut response = Response::new(());
            *response.status_mut() = status;
            Ok(response)
        };

        let classifier = HttpStatusClassifier;
        assert_eq!(classifier.classify(&respond(StatusCode::OK)), Outcome::Pass);
        assert_eq!(classifier.classify(&respond(StatusCode::NOT_FOUND)), Outcome::Pass);
        assert_eq!(classifier.classify(&respond(StatusCode::TOO_MANY_REQUESTS)), Outcome::Pass);
        assert_eq!(classifier.classify(&respond(StatusCode::INTERNAL_SERVER_ERROR)), Outcome::Fail);
        assert_eq!(classifier.classify(&respond(StatusCode::SERVICE_UNAVAILABLE)), Outcome::Fail);
        assert_eq!(classifier.classify(&Err::<Response<()>, ()>(())), Outcome::Fail);
    }
}
