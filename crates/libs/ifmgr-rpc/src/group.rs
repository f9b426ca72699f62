use std::fs;
use std::io;

/// Membership check for the secrets-visibility group.
///
/// Resolves the uid to a user name and primary gid through the system
/// user database, then checks the named group's gid and member list.
pub fn user_in_group(uid: u32, group: &str) -> io::Result<bool> {
    let passwd = fs::read_to_string("/etc/passwd")?;
    let groups = fs::read_to_string("/etc/group")?;
    Ok(user_in_group_from(&passwd, &groups, uid, group))
}

fn lookup_user(passwd: &str, uid: u32) -> Option<(String, u32)> {
    for line in passwd.lines() {
        // name:passwd:uid:gid:gecos:home:shell
        let mut fields = line.split(':');
        let (Some(name), Some(_password), Some(line_uid), Some(gid)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (Ok(line_uid), Ok(gid)) = (line_uid.parse::<u32>(), gid.parse::<u32>()) else {
            continue;
        };
        if line_uid == uid {
            return Some((name.to_string(), gid));
        }
    }
    None
}

pub(crate) fn user_in_group_from(passwd: &str, groups: &str, uid: u32, group: &str) -> bool {
    let Some((user, primary_gid)) = lookup_user(passwd, uid) else {
        return false;
    };

    for line in groups.lines() {
        // name:passwd:gid:member,member
        let mut fields = line.split(':');
        let Some(name) = fields.next() else { continue };
        if name != group {
            continue;
        }
        let _password = fields.next();
        let gid = fields.next().and_then(|g| g.parse::<u32>().ok());
        if gid == Some(primary_gid) {
            return true;
        }
        let members = fields.next().unwrap_or_default();
        if members.split(',').any(|member| member == user) {
            return true;
        }
    }
    false
}
