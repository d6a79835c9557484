//  ██████╗  █████╗ ███████╗███████╗██╗███╗   ██╗ ██████╗
//  ██╔══██╗██╔══██╗██╔════╝██╔════╝██║████╗  ██║██╔════╝
//  ██████╔╝███████║███████╗███████╗██║██╔██╗ ██║██║  ███╗
//  ██╔═══╝ ██╔══██║╚════██║╚════██║██║██║╚██╗██║██║   ██║
//  ██║     ██║  ██║███████║███████║██║██║ ╚████║╚██████╔╝
//  ╚═╝     ╚═╝  ╚═╝╚══════╝╚══════╝╚═╝╚═╝  ╚═══╝ ╚═════╝

#[cfg(test)]
mod passing {
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use pagesnap::jobs::{JobEvent, JobId, JobState};
    use pagesnap::mime::{parse_entity, parse_unstructured_value};
    use pagesnap::{
        ArchiveReader, MemoryFileSystem, MemorySource, NullListener, OutputFormat, SequentialIds,
        SnapshotOptions, Snapshotter,
    };

    const PNG: &[u8] = b"\x89PNG\x0D\x0A\x1A\x0Apixels";

    fn snapshotter(source: &Rc<MemorySource>, fs: &Rc<MemoryFileSystem>, options: SnapshotOptions) -> Snapshotter {
        Snapshotter::new(options, source.clone(), fs.clone(), Rc::new(SequentialIds::new()))
    }

    fn requests_for(source: &MemorySource, suffix: &str) -> usize {
        source.requests().iter().filter(|url| url.ends_with(suffix)).count()
    }

    fn root_text(fs: &MemoryFileSystem, path: &str) -> String {
        let entity = parse_entity(&fs.get(path).unwrap()).unwrap();
        String::from_utf8(entity.parts[0].decoded_body()).unwrap()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn same_target_is_acquired_once() {
        let source = Rc::new(
            MemorySource::new()
                .with(
                    "https://a.example/",
                    "text/html",
                    r#"<img src="a.png"><img src="/a.png#x"><iframe src="f.html"></iframe>"#,
                )
                .with("https://a.example/f.html", "text/html", r#"<img src="https://a.example/a.png">"#)
                .with("https://a.example/a.png", "image/png", PNG),
        );
        let fs = Rc::new(MemoryFileSystem::new());
        let report = snapshotter(&source, &fs, SnapshotOptions::default())
            .save_url("https://a.example/", Path::new("page.mht"), &mut NullListener)
            .await;

        assert!(report.success, "{:?}", report.errors);
        assert_eq!(requests_for(&source, "/a.png"), 1);
        let archive = report.archive.unwrap();
        assert_eq!(archive.resources.iter().filter(|r| r.uri.ends_with("/a.png")).count(), 1);

        let entity = parse_entity(&fs.get("page.mht").unwrap()).unwrap();
        assert_eq!(entity.parts.len(), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn differently_parsed_copies_get_synthetic_uris() {
        let source = Rc::new(
            MemorySource::new()
                .with(
                    "https://a.example/",
                    "text/html",
                    r#"<link rel="stylesheet" href="s.css" charset="utf-8"><link rel="stylesheet" href="s.css">"#,
                )
                .with("https://a.example/s.css", "text/css", "body { color: red }"),
        );
        let fs = Rc::new(MemoryFileSystem::new());
        let report = snapshotter(&source, &fs, SnapshotOptions::default())
            .save_url("https://a.example/", Path::new("page.mht"), &mut NullListener)
            .await;

        assert!(report.success, "{:?}", report.errors);
        assert_eq!(requests_for(&source, "/s.css"), 2);
        let archive = report.archive.unwrap();
        let uris: Vec<&str> = archive.resources.iter().map(|r| r.uri.as_str()).collect();
        assert!(uris.contains(&"https://a.example/s.css"));
        assert!(uris
            .iter()
            .any(|uri| uri.starts_with("urn:snapshot-") && uri.ends_with(":https://a.example/s.css")));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn standard_mhtml_uses_absolute_locations() {
        let source = Rc::new(
            MemorySource::new()
                .with(
                    "https://a.example/",
                    "text/html",
                    "<html><head><title>Caf\u{e9}</title></head><body><img src=\"a.png\"></body></html>",
                )
                .with("https://a.example/a.png", "image/png", PNG),
        );
        let fs = Rc::new(MemoryFileSystem::new());
        let report = snapshotter(&source, &fs, SnapshotOptions::default())
            .save_url("https://a.example/", Path::new("page.mht"), &mut NullListener)
            .await;
        assert!(report.success);

        let entity = parse_entity(&fs.get("page.mht").unwrap()).unwrap();
        let subject = entity.headers.get("Subject").unwrap();
        assert_eq!(parse_unstructured_value(subject), "Caf\u{e9}");
        assert_eq!(entity.parts[0].headers.get("Content-Location"), Some("https://a.example/"));
        assert_eq!(entity.parts[1].headers.get("Content-Location"), Some("https://a.example/a.png"));
        assert_eq!(entity.parts[1].decoded_body(), PNG);
        assert!(root_text(&fs, "page.mht").contains(r#"src="https://a.example/a.png""#));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn media_opt_out_leaves_absolute_url_without_request() {
        let source = Rc::new(
            MemorySource::new()
                .with("https://a.example/", "text/html", r#"<video src="v.mp4"></video>"#)
                .with("https://a.example/v.mp4", "video/mp4", "....ftypmp42"),
        );
        let fs = Rc::new(MemoryFileSystem::new());
        let options = SnapshotOptions {
            save_media: false,
            ..SnapshotOptions::default()
        };
        let report = snapshotter(&source, &fs, options)
            .save_url("https://a.example/", Path::new("page.mht"), &mut NullListener)
            .await;

        assert!(report.success);
        assert_eq!(requests_for(&source, "/v.mp4"), 0);
        assert!(root_text(&fs, "page.mht").contains(r#"src="https://a.example/v.mp4""#));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_subresource_becomes_error_marker() {
        let source = Rc::new(
            MemorySource::new()
                .with("https://a.example/", "text/html", r#"<img src="missing.png">"#)
                .with_failure("https://a.example/missing.png", 500),
        );
        let fs = Rc::new(MemoryFileSystem::new());
        let report = snapshotter(&source, &fs, SnapshotOptions::default())
            .save_url("https://a.example/", Path::new("page.mht"), &mut NullListener)
            .await;

        assert!(report.success);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("500"));
        assert!(root_text(&fs, "page.mht").contains("urn:download-error:https://a.example/missing.png"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn redirected_root_links_to_itself() {
        let source = Rc::new(
            MemorySource::new()
                .with_redirect("https://a.example/", "https://a.example/home")
                .with("https://a.example/home", "text/html", r##"<a href="/home#top">top</a>"##),
        );
        let fs = Rc::new(MemoryFileSystem::new());
        let report = snapshotter(&source, &fs, SnapshotOptions::default())
            .save_url("https://a.example/", Path::new("page.mht"), &mut NullListener)
            .await;

        assert!(report.success);
        assert_eq!(report.archive.unwrap().resources.len(), 1);
        assert!(root_text(&fs, "page.mht").contains(r##"href="#top""##));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rewrites_start_after_every_acquisition() {
        let source = Rc::new(
            MemorySource::new()
                .with("https://a.example/", "text/html", r#"<img src="a.png">"#)
                .with_delayed("https://a.example/a.png", "image/png", PNG, 3),
        );
        let fs = Rc::new(MemoryFileSystem::new());
        let mut events: Vec<JobEvent> = Vec::new();
        let mut listener = |event: &JobEvent| events.push(event.clone());
        let report = snapshotter(&source, &fs, SnapshotOptions::default())
            .save_url("https://a.example/", Path::new("page.mht"), &mut listener)
            .await;
        assert!(report.success);

        let finished: Vec<JobId> = events
            .iter()
            .filter_map(|event| match event {
                JobEvent::Finished { job, state } => {
                    assert_eq!(*state, JobState::Completed);
                    Some(*job)
                }
                JobEvent::Progress { .. } => None,
            })
            .collect();
        // root, image, then the root's rewrite
        assert_eq!(finished, vec![JobId(0), JobId(1), JobId(2)]);

        let image_done = events
            .iter()
            .position(|event| *event == JobEvent::Finished { job: JobId(1), state: JobState::Completed })
            .unwrap();
        assert!(events
            .iter()
            .any(|event| matches!(event, JobEvent::Progress { job: JobId(1), .. })));
        assert!(!events[image_done..]
            .iter()
            .any(|event| matches!(event, JobEvent::Progress { job: JobId(1), .. })));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn folder_layout_uses_relative_paths() {
        let source = Rc::new(
            MemorySource::new()
                .with(
                    "https://a.example/",
                    "text/html",
                    r#"<link rel="stylesheet" href="css/s.css"><img src="a.png">"#,
                )
                .with("https://a.example/css/s.css", "text/css", "body { background: url(bg.png) }")
                .with("https://a.example/css/bg.png", "image/png", PNG)
                .with("https://a.example/a.png", "image/png", PNG),
        );
        let fs = Rc::new(MemoryFileSystem::new());
        let options = SnapshotOptions {
            format: OutputFormat::Folder,
            ..SnapshotOptions::default()
        };
        let report = snapshotter(&source, &fs, options)
            .save_url("https://a.example/", Path::new("site/page.html"), &mut NullListener)
            .await;
        assert!(report.success, "{:?}", report.errors);

        assert_eq!(
            fs.paths(),
            vec![
                PathBuf::from("site/page.html"),
                PathBuf::from("site/page_files/a.png"),
                PathBuf::from("site/page_files/bg.png"),
                PathBuf::from("site/page_files/s.css"),
            ]
        );
        let page = String::from_utf8(fs.get("site/page.html").unwrap()).unwrap();
        assert!(page.contains(r#"href="page_files/s.css""#));
        assert!(page.contains(r#"src="page_files/a.png""#));
        let sheet = String::from_utf8(fs.get("site/page_files/s.css").unwrap()).unwrap();
        assert!(sheet.contains("bg.png"));
        assert!(!sheet.contains("https://"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn saved_archive_extracts_to_folder() {
        let source = Rc::new(
            MemorySource::new()
                .with("https://a.example/", "text/html", r#"<img src="a.png">"#)
                .with("https://a.example/a.png", "image/png", PNG),
        );
        let fs = Rc::new(MemoryFileSystem::new());
        let report = snapshotter(&source, &fs, SnapshotOptions::default())
            .save_url("https://a.example/", Path::new("page.mht"), &mut NullListener)
            .await;
        assert!(report.success);

        let reader = ArchiveReader::new(fs.clone(), Rc::new(SequentialIds::new()));
        let extracted = reader
            .extract_file(Path::new("page.mht"), Path::new("out"))
            .await
            .unwrap();

        assert_eq!(extracted.root, PathBuf::from("out/index.html"));
        assert_eq!(fs.get("out/index_files/a.png").unwrap(), PNG);
        let index = String::from_utf8(fs.get("out/index.html").unwrap()).unwrap();
        assert!(index.contains(r#"src="index_files/a.png""#));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn preloaded_document_is_not_requested() {
        let source = Rc::new(MemorySource::new().with("https://a.example/a.png", "image/png", PNG));
        let fs = Rc::new(MemoryFileSystem::new());
        let url = url::Url::parse("https://a.example/").unwrap();
        let report = snapshotter(&source, &fs, SnapshotOptions::default())
            .save_document(&url, br#"<img src="a.png">"#, None, Path::new("page.mht"), &mut NullListener)
            .await;

        assert!(report.success);
        assert_eq!(source.requests(), vec!["https://a.example/a.png".to_string()]);
    }
}

//  ███████╗ █████╗ ██╗██╗     ██╗███╗   ██╗ ██████╗
//  ██╔════╝██╔══██╗██║██║     ██║████╗  ██║██╔════╝
//  █████╗  ███████║██║██║     ██║██╔██╗ ██║██║  ███╗
//  ██╔══╝  ██╔══██║██║██║     ██║██║╚██╗██║██║   ██║
//  ██║     ██║  ██║██║███████╗██║██║ ╚████║╚██████╔╝
//  ╚═╝     ╚═╝  ╚═╝╚═╝╚══════╝╚═╝╚═╝  ╚═══╝ ╚═════╝

#[cfg(test)]
mod failing {
    use std::path::Path;
    use std::rc::Rc;

    use pagesnap::{MemoryFileSystem, MemorySource, NullListener, SequentialIds, SnapshotOptions, Snapshotter};

    #[tokio::test(flavor = "current_thread")]
    async fn missing_root_fails_without_output() {
        let source = Rc::new(MemorySource::new());
        let fs = Rc::new(MemoryFileSystem::new());
        let snapshotter = Snapshotter::new(
            SnapshotOptions::default(),
            source,
            fs.clone(),
            Rc::new(SequentialIds::new()),
        );
        let report = snapshotter
            .save_url("https://a.example/", Path::new("page.mht"), &mut NullListener)
            .await;

        assert!(!report.success);
        assert!(report.archive.is_none());
        assert!(report.errors[0].contains("404"));
        assert!(fs.paths().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn multipart_root_is_unsupported() {
        let source = Rc::new(MemorySource::new().with(
            "https://a.example/page.mht",
            "multipart/related; boundary=x",
            "--x\r\n\r\nbody\r\n--x--\r\n",
        ));
        let fs = Rc::new(MemoryFileSystem::new());
        let snapshotter = Snapshotter::new(
            SnapshotOptions::default(),
            source,
            fs.clone(),
            Rc::new(SequentialIds::new()),
        );
        let report = snapshotter
            .save_url("https://a.example/page.mht", Path::new("out.mht"), &mut NullListener)
            .await;

        assert!(!report.success);
        assert!(report.errors[0].contains("multipart/related"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn canceled_run_reports_cancellation() {
        let source = Rc::new(MemorySource::new().with("https://a.example/", "text/html", "<p>hi</p>"));
        let fs = Rc::new(MemoryFileSystem::new());
        let snapshotter = Snapshotter::new(
            SnapshotOptions::default(),
            source,
            fs.clone(),
            Rc::new(SequentialIds::new()),
        );
        snapshotter.cancel_token().cancel();
        let report = snapshotter
            .save_url("https://a.example/", Path::new("page.mht"), &mut NullListener)
            .await;

        assert!(!report.success);
        assert_eq!(report.errors, vec!["Snapshot canceled".to_string()]);
        assert!(fs.paths().is_empty());
    }
}
