//! Access control lists.
//!
//! ACLs are stored as JSON on the bucket record and evaluated per
//! request after authentication.  The bucket owner implicitly holds
//! FULL_CONTROL regardless of what the grant list says.

use serde::{Deserialize, Serialize};

use crate::errors::S3Error;

/// Group URI granting access to every requester.
pub const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// Group URI granting access to every authenticated requester.
pub const AUTHENTICATED_USERS_URI: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

/// The set of S3 ACL permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "READ")]
    Read,
    #[serde(rename = "WRITE")]
    Write,
    #[serde(rename = "READ_ACP")]
    ReadAcp,
    #[serde(rename = "WRITE_ACP")]
    WriteAcp,
    #[serde(rename = "FULL_CONTROL")]
    FullControl,
}

impl Permission {
    /// The wire-format string for this permission.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "READ",
            Permission::Write => "WRITE",
            Permission::ReadAcp => "READ_ACP",
            Permission::WriteAcp => "WRITE_ACP",
            Permission::FullControl => "FULL_CONTROL",
        }
    }

    /// Parse a wire-format permission string.
    pub fn parse(s: &str) -> Option<Permission> {
        match s {
            "READ" => Some(Permission::Read),
            "WRITE" => Some(Permission::Write),
            "READ_ACP" => Some(Permission::ReadAcp),
            "WRITE_ACP" => Some(Permission::WriteAcp),
            "FULL_CONTROL" => Some(Permission::FullControl),
            _ => None,
        }
    }
}

/// An S3 Access Control List.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Acl {
    /// Owner of the resource.
    #[serde(default)]
    pub owner: AclOwner,
    /// List of access grants.
    #[serde(default)]
    pub grants: Vec<AclGrant>,
}

/// Owner portion of an ACL.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AclOwner {
    /// Canonical account ID.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
}

/// A single ACL grant entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclGrant {
    /// The grantee receiving the permission.
    pub grantee: AclGrantee,
    /// The permission being granted.
    pub permission: Permission,
}

/// A grantee in an ACL grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AclGrantee {
    /// A canonical account grantee.
    CanonicalUser {
        id: String,
        #[serde(default)]
        display_name: String,
    },
    /// A group grantee (AllUsers or AuthenticatedUsers).
    Group { uri: String },
}

impl Acl {
    /// Create a default FULL_CONTROL ACL for the given owner.
    pub fn full_control(owner_id: &str, display_name: &str) -> Self {
        Acl {
            owner: AclOwner {
                id: owner_id.to_string(),
                display_name: display_name.to_string(),
            },
            grants: vec![AclGrant {
                grantee: AclGrantee::CanonicalUser {
                    id: owner_id.to_string(),
                    display_name: display_name.to_string(),
                },
                permission: Permission::FullControl,
            }],
        }
    }

    /// Build an ACL from a canned ACL name as carried in `x-amz-acl`.
    pub fn from_canned(canned: &str, owner_id: &str, display_name: &str) -> Result<Acl, S3Error> {
        let mut acl = Acl::full_control(owner_id, display_name);
        match canned {
            "private" => {}
            "public-read" => {
                acl.grants.push(AclGrant {
                    grantee: AclGrantee::Group {
                        uri: ALL_USERS_URI.to_string(),
                    },
                    permission: Permission::Read,
                });
            }
            "public-read-write" => {
                acl.grants.push(AclGrant {
                    grantee: AclGrantee::Group {
                        uri: ALL_USERS_URI.to_string(),
                    },
                    permission: Permission::Read,
                });
                acl.grants.push(AclGrant {
                    grantee: AclGrantee::Group {
                        uri: ALL_USERS_URI.to_string(),
                    },
                    permission: Permission::Write,
                });
            }
            "authenticated-read" => {
                acl.grants.push(AclGrant {
                    grantee: AclGrantee::Group {
                        uri: AUTHENTICATED_USERS_URI.to_string(),
                    },
                    permission: Permission::Read,
                });
            }
            _ => {
                return Err(S3Error::InvalidArgument {
                    message: format!("Invalid canned ACL: {canned}"),
                });
            }
        }
        Ok(acl)
    }

    /// Serialize for storage in a metadata record.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Deserialize from a metadata record. An unreadable ACL denies
    /// everything except the owner, which is the safe direction.
    pub fn from_json(json: &str) -> Acl {
        serde_json::from_str(json).unwrap_or_default()
    }

    /// Check whether `account_id` holds `needed` under this ACL.
    ///
    /// The owner always passes. FULL_CONTROL implies every permission.
    /// Group grants apply to every requester here because all requests
    /// reaching authorization have already authenticated.
    pub fn allows(&self, account_id: &str, needed: Permission) -> bool {
        if self.owner.id == account_id {
            return true;
        }
        self.grants.iter().any(|grant| {
            let applies = match &grant.grantee {
                AclGrantee::CanonicalUser { id, .. } => id == account_id,
                AclGrantee::Group { uri } => {
                    uri == ALL_USERS_URI || uri == AUTHENTICATED_USERS_URI
                }
            };
            applies && (grant.permission == needed || grant.permission == Permission::FullControl)
        })
    }
}
