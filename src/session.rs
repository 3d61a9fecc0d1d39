use axum_extra::extract::cookie::{Cookie, CookieJar};
use uuid::Uuid;

/// Cookie carrying the basket session id.
pub const SESSION_COOKIE: &str = "sid";

/// Session id from the request cookies, or a new one.
///
/// The returned jar must be part of the response so a newly issued id
/// reaches the client.
pub fn resolve(jar: CookieJar) -> (CookieJar, String) {
    if let Some(sid) = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
    {
        return (jar, sid);
    }

    let sid = Uuid::new_v4().to_string();
    let cookie = Cookie::build((SESSION_COOKIE, sid.clone()))
        .path("/")
        .http_only(true);

    (jar.add(cookie), sid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_cookie_is_kept() {
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "abc"));
        let (_, sid) = resolve(jar);
        assert_eq!(sid, "abc");
    }

    #[test]
    fn missing_cookie_issues_uuid() {
        let (jar, sid) = resolve(CookieJar::new());
        assert!(Uuid::parse_str(&sid).is_ok());
        assert_eq!(jar.get(SESSION_COOKIE).map(|c| c.value()), Some(sid.as_str()));
    }
}
