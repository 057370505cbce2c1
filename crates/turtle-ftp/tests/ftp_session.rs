//! Drives `FtpTransport` against a small in-process FTP server speaking
//! plain-text RFC 959 with an in-memory filesystem.

use secrecy::SecretString;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use turtle_core::{ClosedFlag, DeployErrorKind, Transport};
use turtle_ftp::{FtpConnectionConfig, FtpOptions, FtpSecurityMode, FtpTransport};

const PASSWORD: &str = "s3cret";

#[derive(Default)]
struct MemFs {
    dirs: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
    commands: Vec<String>,
}

#[derive(Clone, Copy)]
struct ServerOpts {
    syst: &'static str,
    feat: &'static [&'static str],
}

const UNIX: ServerOpts = ServerOpts {
    syst: "UNIX Type: L8",
    feat: &["EPSV", "PASV", "UTF8"],
};

const LEGACY: ServerOpts = ServerOpts {
    syst: "Windows_NT",
    feat: &["PASV"],
};

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for c in path.split('/') {
        match c {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn resolve(cwd: &str, arg: &str) -> String {
    if arg.starts_with('/') {
        normalize(arg)
    } else {
        normalize(&format!("{}/{}", cwd, arg))
    }
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

async fn start_server(opts: ServerOpts) -> (u16, Arc<Mutex<MemFs>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let fs = Arc::new(Mutex::new(MemFs::default()));
    fs.lock().unwrap().dirs.insert("/".into());
    let shared = fs.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, shared.clone(), opts));
        }
    });
    (port, fs)
}

async fn serve(stream: TcpStream, fs: Arc<Mutex<MemFs>>, opts: ServerOpts) {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();
    wr.write_all(b"220-scripted ftpd\r\n220 ready\r\n").await.unwrap();
    let mut cwd = "/".to_string();
    let mut passive: Option<TcpListener> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        fs.lock().unwrap().commands.push(verb.clone());

        let reply = match verb.as_str() {
            "USER" => "331 Please specify the password.".to_string(),
            "PASS" if arg == PASSWORD => "230 Login successful.".to_string(),
            "PASS" => "530 Login incorrect.".to_string(),
            "FEAT" => {
                let mut s = String::from("211-Features:\r\n");
                for f in opts.feat {
                    s.push_str(&format!(" {}\r\n", f));
                }
                s.push_str("211 End");
                s
            }
            "SYST" => format!("215 {}", opts.syst),
            "OPTS" | "TYPE" | "NOOP" => "200 OK.".to_string(),
            "PWD" => format!("257 \"{}\" is the current directory", cwd),
            "CWD" => {
                let target = resolve(&cwd, &arg);
                if fs.lock().unwrap().dirs.contains(&target) {
                    cwd = target;
                    "250 Directory successfully changed.".to_string()
                } else {
                    "550 Failed to change directory.".to_string()
                }
            }
            "CDUP" => {
                cwd = parent(&cwd);
                "250 Directory successfully changed.".to_string()
            }
            "MKD" => {
                let target = resolve(&cwd, &arg);
                let mut f = fs.lock().unwrap();
                if f.dirs.contains(&target) || !f.dirs.contains(&parent(&target)) {
                    "550 Create directory operation failed.".to_string()
                } else {
                    f.dirs.insert(target.clone());
                    format!("257 \"{}\" created", target)
                }
            }
            "PASV" | "EPSV" => {
                let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let p = l.local_addr().unwrap().port();
                passive = Some(l);
                if verb == "PASV" {
                    format!("227 Entering Passive Mode (127,0,0,1,{},{}).", p >> 8, p & 0xff)
                } else {
                    format!("229 Entering Extended Passive Mode (|||{}|)", p)
                }
            }
            "STOR" => {
                let target = resolve(&cwd, &arg);
                let parent_ok = fs.lock().unwrap().dirs.contains(&parent(&target));
                match passive.take() {
                    None => "425 Use PASV first.".to_string(),
                    Some(_) if !parent_ok => {
                        "553 Could not create file.".to_string()
                    }
                    Some(l) => {
                        wr.write_all(b"150 Ok to send data.\r\n").await.unwrap();
                        let (mut data, _) = l.accept().await.unwrap();
                        let mut buf = Vec::new();
                        data.read_to_end(&mut buf).await.unwrap();
                        fs.lock().unwrap().files.insert(target, buf);
                        "226 Transfer complete.".to_string()
                    }
                }
            }
            "QUIT" => {
                wr.write_all(b"221 Goodbye.\r\n").await.unwrap();
                break;
            }
            _ => "502 Command not implemented.".to_string(),
        };
        wr.write_all(format!("{}\r\n", reply).as_bytes()).await.unwrap();
    }
}

fn config(port: u16, password: &str) -> FtpConnectionConfig {
    FtpConnectionConfig {
        host: "127.0.0.1".into(),
        port,
        username: "deploy".into(),
        password: SecretString::new(password.into()),
        options: FtpOptions {
            security: FtpSecurityMode::None,
            ..FtpOptions::default()
        },
    }
}

fn local_site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/b.txt"), b"bravo").unwrap();
    dir
}

#[tokio::test]
async fn test_mirror_creates_missing_parents() {
    let (port, fs) = start_server(UNIX).await;
    let site = local_site();
    let mut ftp = FtpTransport::connect(config(port, PASSWORD), ClosedFlag::new()).await.unwrap();
    assert!(!ftp.has_tree_primitive());

    let stats = ftp.upload_tree(site.path(), "/deploy/site").await.unwrap();
    assert_eq!(stats.files_uploaded, 2);
    assert_eq!(stats.directories_created, 3);

    {
        let f = fs.lock().unwrap();
        assert!(f.dirs.contains("/deploy"));
        assert!(f.dirs.contains("/deploy/site/sub"));
        assert_eq!(f.files["/deploy/site/a.txt"], b"alpha");
        assert_eq!(f.files["/deploy/site/sub/b.txt"], b"bravo");
        assert!(f.commands.contains(&"EPSV".to_string()));
    }

    // second run: every MKD fails and the CWD probe proves the dir exists
    let again = ftp.upload_tree(site.path(), "/deploy/site").await.unwrap();
    assert_eq!(again.directories_created, 0);
    assert_eq!(again.directories_existing, 2);

    ftp.keepalive().await.unwrap();
    ftp.close().await.unwrap();
    assert_eq!(fs.lock().unwrap().commands.last().unwrap(), "QUIT");
}

#[tokio::test]
async fn test_change_directory_fallback() {
    let (port, fs) = start_server(LEGACY).await;
    let site = local_site();
    let mut ftp = FtpTransport::connect(config(port, PASSWORD), ClosedFlag::new()).await.unwrap();
    assert!(ftp.has_tree_primitive());

    let stats = ftp.upload_tree(site.path(), "/www").await.unwrap();
    assert_eq!(stats.files_uploaded, 2);
    assert_eq!(stats.directories_created, 1);
    assert_eq!(stats.directories_existing, 0);

    {
        let f = fs.lock().unwrap();
        assert_eq!(f.files["/www/a.txt"], b"alpha");
        assert_eq!(f.files["/www/sub/b.txt"], b"bravo");
        assert!(f.commands.contains(&"CDUP".to_string()));
        assert!(f.commands.contains(&"PASV".to_string()));
    }

    // "sub" is already there on the second pass
    let again = ftp.upload_tree(site.path(), "/www").await.unwrap();
    assert_eq!(again.files_uploaded, 2);
    assert_eq!(again.directories_created, 0);
    assert_eq!(again.directories_existing, 1);
}

#[tokio::test]
async fn test_bad_password_is_auth_error() {
    let (port, _fs) = start_server(UNIX).await;
    let err = FtpTransport::connect(config(port, "wrong"), ClosedFlag::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, DeployErrorKind::Auth);
}

#[tokio::test]
async fn test_refused_connection_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let err = FtpTransport::connect(config(port, PASSWORD), ClosedFlag::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, DeployErrorKind::Network);
}

#[tokio::test]
async fn test_server_hangup_marks_closed() {
    let (port, _fs) = start_server(UNIX).await;
    let closed = ClosedFlag::new();
    let mut ftp = FtpTransport::connect(config(port, PASSWORD), closed.clone()).await.unwrap();
    // QUIT makes the scripted server hang up; the next command sees EOF
    ftp.client_mut().codec.execute("QUIT").await.unwrap();
    let err = ftp.keepalive().await.unwrap_err();
    assert_eq!(err.kind, DeployErrorKind::Disconnected);
    assert!(closed.is_closed());
}
